//! Message and reply envelopes

use crate::constants::{STATUS_ERROR, STATUS_OK, STATUS_WARNING};
use crate::value::{Struct, Value};
use crate::{CoreError, Result};

pub const KEY_MTYPE: &str = "samp.mtype";
pub const KEY_PARAMS: &str = "samp.params";
pub const KEY_STATUS: &str = "samp.status";
pub const KEY_RESULT: &str = "samp.result";
pub const KEY_ERROR: &str = "samp.error";
pub const KEY_ERRORTXT: &str = "samp.errortxt";

/// A notification or call payload
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub mtype: String,
    pub params: Struct,
    /// Any further members, e.g. provenance injected by the hub
    pub extra: Struct,
}

impl Message {
    pub fn new(mtype: impl Into<String>) -> Self {
        Self {
            mtype: mtype.into(),
            params: Struct::new(),
            extra: Struct::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let members = value.as_struct().ok_or_else(|| {
            CoreError::Protocol(format!("message must be a struct, found {}", value.kind()))
        })?;
        let mtype = members
            .get(KEY_MTYPE)
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Protocol(format!("message without {}", KEY_MTYPE)))?
            .to_string();
        let params = match members.get(KEY_PARAMS) {
            Some(Value::Struct(params)) => params.clone(),
            Some(other) => {
                return Err(CoreError::Protocol(format!(
                    "{} must be a struct, found {}",
                    KEY_PARAMS,
                    other.kind()
                )))
            }
            None => Struct::new(),
        };
        let extra = members
            .iter()
            .filter(|(k, _)| k.as_str() != KEY_MTYPE && k.as_str() != KEY_PARAMS)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            mtype,
            params,
            extra,
        })
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        let mut members = message.extra;
        members.insert(KEY_MTYPE.to_string(), Value::String(message.mtype));
        members.insert(KEY_PARAMS.to_string(), Value::Struct(message.params));
        Value::Struct(members)
    }
}

/// Reply payload sent back for a call
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: String,
    pub result: Option<Struct>,
    pub error: Option<Struct>,
}

impl Response {
    pub fn ok(result: Struct) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn warning(result: Struct, errortxt: impl Into<String>) -> Self {
        Self {
            status: STATUS_WARNING.to_string(),
            result: Some(result),
            error: Some(error_struct(errortxt.into())),
        }
    }

    pub fn error(errortxt: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            result: None,
            error: Some(error_struct(errortxt.into())),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

fn error_struct(errortxt: String) -> Struct {
    let mut error = Struct::new();
    error.insert(KEY_ERRORTXT.to_string(), Value::String(errortxt));
    error
}

impl From<Response> for Value {
    fn from(response: Response) -> Self {
        let mut members = Struct::new();
        members.insert(KEY_STATUS.to_string(), Value::String(response.status));
        if let Some(result) = response.result {
            members.insert(KEY_RESULT.to_string(), Value::Struct(result));
        }
        if let Some(error) = response.error {
            members.insert(KEY_ERROR.to_string(), Value::Struct(error));
        }
        Value::Struct(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_to_value_and_back() {
        let message = Message::new("table.load.votable")
            .with_param("url", "file:///tmp/t.xml")
            .with_param("table-id", "t1");
        let value = Value::from(message.clone());

        assert_eq!(
            value.get(KEY_MTYPE).and_then(Value::as_str),
            Some("table.load.votable")
        );
        assert_eq!(Message::from_value(&value).expect("valid"), message);
    }

    #[test]
    fn test_message_extra_members_kept() {
        let mut value = Value::from(Message::new("samp.app.ping"));
        let members = value.as_struct_mut().expect("struct");
        members.insert("host".to_string(), "10.0.0.2".into());
        members.insert("user".to_string(), "alice".into());

        let message = Message::from_value(&value).expect("valid");
        assert_eq!(message.extra.get("user"), Some(&Value::from("alice")));
        assert_eq!(message.extra.len(), 2);
    }

    #[test]
    fn test_message_requires_mtype() {
        assert!(Message::from_value(&Value::Struct(Struct::new())).is_err());
        assert!(Message::from_value(&Value::from("x")).is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let value = Value::from(Response::error("no such table"));
        assert_eq!(
            value.get(KEY_STATUS).and_then(Value::as_str),
            Some(STATUS_ERROR)
        );
        assert_eq!(
            value
                .get(KEY_ERROR)
                .and_then(|e| e.get(KEY_ERRORTXT))
                .and_then(Value::as_str),
            Some("no such table")
        );
        assert!(value.get(KEY_RESULT).is_none());
    }

    #[test]
    fn test_ok_response() {
        let response = Response::ok(Struct::new());
        assert!(response.is_ok());
        assert!(!Response::error("x").is_ok());
    }
}
