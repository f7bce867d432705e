//! XML-RPC envelope encoding and decoding
//!
//! Requests are `methodCall` documents (method name plus positional
//! parameters); responses carry either a single value or a fault.

use crate::value::{Struct, Value};
use crate::{CoreError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write;

/// Decoded XML-RPC request
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<Value>,
}

/// XML-RPC fault
#[derive(Clone, Debug, PartialEq)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

/// Decoded XML-RPC response
#[derive(Clone, Debug, PartialEq)]
pub enum MethodResponse {
    Success(Value),
    Fault(Fault),
}

impl MethodCall {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn encode(&self) -> String {
        encode_call(&self.method, &self.params)
    }
}

impl MethodResponse {
    /// Convert into a result, mapping faults to `CoreError::Fault`
    pub fn into_result(self) -> Result<Value> {
        match self {
            MethodResponse::Success(value) => Ok(value),
            MethodResponse::Fault(fault) => Err(CoreError::Fault {
                code: fault.code,
                message: fault.message,
            }),
        }
    }
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

pub fn encode_response(value: &Value) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><params><param>");
    write_value(&mut out, value);
    out.push_str("</param></params></methodResponse>\n");
    out
}

pub fn encode_fault(fault: &Fault) -> String {
    let mut members = Struct::new();
    members.insert("faultCode".to_string(), Value::Int(i64::from(fault.code)));
    members.insert("faultString".to_string(), Value::String(fault.message.clone()));

    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodResponse><fault>");
    write_value(&mut out, &Value::Struct(members));
    out.push_str("</fault></methodResponse>\n");
    out
}

pub fn decode_call(data: &[u8]) -> Result<MethodCall> {
    let root = parse_document(data)?;
    if root.name != "methodCall" {
        return Err(protocol(format!("expected methodCall, found {}", root.name)));
    }

    let method = root
        .child("methodName")
        .map(|el| el.text.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| protocol("methodCall without methodName"))?;

    let params = match root.child("params") {
        Some(params) => decode_params(params)?,
        None => Vec::new(),
    };

    Ok(MethodCall { method, params })
}

pub fn decode_response(data: &[u8]) -> Result<MethodResponse> {
    let root = parse_document(data)?;
    if root.name != "methodResponse" {
        return Err(protocol(format!("expected methodResponse, found {}", root.name)));
    }

    if let Some(fault) = root.child("fault") {
        let value = fault
            .child("value")
            .ok_or_else(|| protocol("fault without value"))
            .and_then(decode_value)?;
        let code = value
            .get("faultCode")
            .and_then(Value::as_i64)
            .and_then(|c| i32::try_from(c).ok())
            .ok_or_else(|| protocol("fault without integer faultCode"))?;
        let message = value
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Ok(MethodResponse::Fault(Fault { code, message }));
    }

    let mut params = match root.child("params") {
        Some(params) => decode_params(params)?,
        None => Vec::new(),
    };
    // A response without a value is treated as nil
    let value = if params.is_empty() {
        Value::Nil
    } else {
        params.swap_remove(0)
    };
    Ok(MethodResponse::Success(value))
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) if i32::try_from(*i).is_ok() => {
            let _ = write!(out, "<int>{}</int>", i);
        }
        Value::Int(i) => {
            let _ = write!(out, "<i8>{}</i8>", i);
        }
        Value::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", if *b { 1 } else { 0 });
        }
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::Double(d) => {
            let _ = write!(out, "<double>{}</double>", d);
        }
        Value::DateTime(dt) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&escape(dt.as_str()));
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(bytes) => {
            out.push_str("<base64>");
            out.push_str(&STANDARD.encode(bytes));
            out.push_str("</base64>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

/// Minimal element tree; text is kept verbatim so string values keep
/// their whitespace
#[derive(Debug, Default)]
struct Element {
    name: String,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn new(name: &[u8]) -> Result<Self> {
        let name = std::str::from_utf8(name)
            .map_err(|e| protocol(format!("invalid element name: {}", e)))?;
        Ok(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Deepest element nesting accepted in a document
pub const MAX_NESTING_DEPTH: usize = 256;

fn parse_document(data: &[u8]) -> Result<Element> {
    let mut reader = Reader::from_reader(data);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_NESTING_DEPTH {
                    return Err(protocol(format!(
                        "document nested deeper than {} elements",
                        MAX_NESTING_DEPTH
                    )));
                }
                stack.push(Element::new(e.local_name().as_ref())?);
            }
            Ok(Event::Empty(e)) => {
                let element = Element::new(e.local_name().as_ref())?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| protocol("unbalanced closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| protocol(format!("invalid text: {}", e)))?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    let raw = c.into_inner();
                    let text = std::str::from_utf8(&raw)
                        .map_err(|e| protocol(format!("invalid CDATA: {}", e)))?;
                    top.text.push_str(text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(protocol(format!(
                    "malformed XML at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(protocol("unexpected end of document"));
    }
    root.ok_or_else(|| protocol("empty document"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(protocol("multiple root elements")),
    }
    Ok(())
}

fn decode_params(params: &Element) -> Result<Vec<Value>> {
    params
        .children
        .iter()
        .filter(|p| p.name == "param")
        .map(|p| {
            p.child("value")
                .ok_or_else(|| protocol("param without value"))
                .and_then(decode_value)
        })
        .collect()
}

fn decode_value(element: &Element) -> Result<Value> {
    let Some(typed) = element.children.first() else {
        // Untyped values are strings
        return Ok(Value::String(element.text.clone()));
    };

    let text = typed.text.trim();
    match typed.name.as_str() {
        "int" | "i4" | "i8" => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| protocol(format!("invalid integer: {}", text))),
        "boolean" => match text {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            other => Err(protocol(format!("invalid boolean: {}", other))),
        },
        "string" => Ok(Value::String(typed.text.clone())),
        "double" => text
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| protocol(format!("invalid double: {}", text))),
        "dateTime.iso8601" => Ok(Value::DateTime(text.to_string())),
        "base64" => {
            let compact: String = text.split_whitespace().collect();
            STANDARD
                .decode(compact)
                .map(Value::Base64)
                .map_err(|e| protocol(format!("invalid base64: {}", e)))
        }
        "struct" => {
            let mut members = Struct::new();
            for member in typed.children.iter().filter(|m| m.name == "member") {
                let name = member
                    .child("name")
                    .ok_or_else(|| protocol("struct member without name"))?;
                let value = member
                    .child("value")
                    .ok_or_else(|| protocol("struct member without value"))
                    .and_then(decode_value)?;
                members.insert(name.text.clone(), value);
            }
            Ok(Value::Struct(members))
        }
        "array" => {
            let data = typed
                .child("data")
                .ok_or_else(|| protocol("array without data"))?;
            data.children
                .iter()
                .filter(|v| v.name == "value")
                .map(decode_value)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        "nil" => Ok(Value::Nil),
        other => Err(protocol(format!("unknown value type: {}", other))),
    }
}

fn protocol(message: impl Into<String>) -> CoreError {
    CoreError::Protocol(message.into())
}
