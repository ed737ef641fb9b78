//! Error types for vSphere FCD operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("vSphere fault {kind}: {message}")]
    Fault { kind: String, message: String },

    #[error("vSphere API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session is not authenticated - log in again")]
    NotAuthenticated,

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Virtual machine not found: {0}")]
    VmNotFound(String),

    #[error("Datastore not found: {0}")]
    DatastoreNotFound(String),

    #[error("Datacenter not found for {0}")]
    DatacenterNotFound(String),

    #[error("Virtual disk not found: {0}")]
    DiskNotFound(String),

    #[error("{0} is not a First Class Disk")]
    NotFirstClass(String),

    #[error("{label} is already a First Class Disk with id {id}")]
    AlreadyFirstClass { label: String, id: String },

    #[error("Task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Timed out waiting for task {0}")]
    Timeout(String),

    /// The disk was left detached; `revert` holds the revert's own failure
    #[error("{}", reattach_message(.disk, .revert.as_deref(), .source))]
    Reattach {
        disk: String,
        revert: Option<Box<Error>>,
        #[source]
        source: Box<Error>,
    },

    #[error("Unsupported by endpoint: {0}")]
    Unsupported(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is a lookup miss (VM, datastore, datacenter or disk)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::VmNotFound(_)
                | Error::DatastoreNotFound(_)
                | Error::DatacenterNotFound(_)
                | Error::DiskNotFound(_)
        )
    }

    /// Build an error from a non-success HTTP response body.
    ///
    /// VI/JSON faults carry `_typeName` and a `faultMessage` list; anything
    /// else is reported verbatim.
    pub fn from_response(status: u16, body: &str) -> Self {
        if status == 401 {
            return Error::NotAuthenticated;
        }

        let fault: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => {
                return Error::Api {
                    status,
                    message: body.trim().to_string(),
                }
            }
        };

        let Some(kind) = fault.get("_typeName").and_then(|v| v.as_str()) else {
            return Error::Api {
                status,
                message: body.trim().to_string(),
            };
        };

        let message = fault
            .get("faultMessage")
            .and_then(|v| v.as_array())
            .and_then(|msgs| msgs.iter().find_map(|m| m.get("message")?.as_str()))
            .or_else(|| fault.get("message").and_then(|v| v.as_str()))
            .unwrap_or(kind)
            .to_string();

        Error::Fault {
            kind: kind.to_string(),
            message,
        }
    }
}

fn reattach_message(disk: &str, revert: Option<&Error>, source: &Error) -> String {
    match revert {
        None => format!("Revert finished but {disk} could not be attached back: {source}"),
        Some(e) => format!("Revert of {disk} failed ({e}) and it could not be attached back: {source}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_with_message_list() {
        let body = r#"{"_typeName":"NotFound","faultMessage":[{"_typeName":"LocalizableMessage","key":"k","message":"The object has been deleted"}]}"#;
        match Error::from_response(500, body) {
            Error::Fault { kind, message } => {
                assert_eq!(kind, "NotFound");
                assert_eq!(message, "The object has been deleted");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fault_without_message_uses_kind() {
        let body = r#"{"_typeName":"InvalidLogin"}"#;
        match Error::from_response(500, body) {
            Error::Fault { kind, message } => {
                assert_eq!(kind, "InvalidLogin");
                assert_eq!(message, "InvalidLogin");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_non_json_body() {
        match Error::from_response(503, "Service Unavailable\n") {
            Error::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "Service Unavailable");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unauthorized() {
        assert!(matches!(
            Error::from_response(401, "{}"),
            Error::NotAuthenticated
        ));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::VmNotFound("vm1".into()).is_not_found());
        assert!(Error::DiskNotFound("Hard disk 3".into()).is_not_found());
        assert!(!Error::Timeout("task-1".into()).is_not_found());
    }

    #[test]
    fn test_reattach_message_names_both_failures() {
        let err = Error::Reattach {
            disk: "Hard disk 2".into(),
            revert: Some(Box::new(Error::Timeout("task-9".into()))),
            source: Box::new(Error::NotAuthenticated),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Revert of Hard disk 2 failed"));
        assert!(msg.contains("task-9"));
        assert!(!msg.contains("Revert finished"));

        let err = Error::Reattach {
            disk: "Hard disk 2".into(),
            revert: None,
            source: Box::new(Error::NotAuthenticated),
        };
        assert!(err.to_string().starts_with("Revert finished but Hard disk 2"));
    }
}
