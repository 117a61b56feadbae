//! What route handlers return, and the JSON rendering shared by views and the error middleware.

use crate::model::Record;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use serde::Serialize;
use serde_json::Value;

/// Data to serialize through the route's response schema.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Empty,
    One(Record),
    Many(Vec<Record>),
}

impl From<Record> for Payload {
    fn from(r: Record) -> Self {
        Payload::One(r)
    }
}

impl From<Vec<Record>> for Payload {
    fn from(rs: Vec<Record>) -> Self {
        Payload::Many(rs)
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Empty
    }
}

/// A handler result: data plus status and extra headers, or a finished response passed through as is.
#[derive(Debug)]
pub enum Reply {
    Data {
        payload: Payload,
        status: StatusCode,
        headers: HeaderMap,
    },
    Raw(Response),
}

impl Reply {
    pub fn new(payload: impl Into<Payload>, status: StatusCode) -> Self {
        Reply::Data {
            payload: payload.into(),
            status,
            headers: HeaderMap::new(),
        }
    }
}

impl From<Payload> for Reply {
    fn from(payload: Payload) -> Self {
        Reply::new(payload, StatusCode::OK)
    }
}

impl From<Record> for Reply {
    fn from(r: Record) -> Self {
        Reply::new(r, StatusCode::OK)
    }
}

impl From<Vec<Record>> for Reply {
    fn from(rs: Vec<Record>) -> Self {
        Reply::new(rs, StatusCode::OK)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::new(Payload::Empty, StatusCode::OK)
    }
}

impl From<Response> for Reply {
    fn from(r: Response) -> Self {
        Reply::Raw(r)
    }
}

impl<T: Into<Payload>> From<(T, StatusCode)> for Reply {
    fn from((payload, status): (T, StatusCode)) -> Self {
        Reply::new(payload, status)
    }
}

impl<T: Into<Payload>> From<(T, StatusCode, HeaderMap)> for Reply {
    fn from((payload, status, headers): (T, StatusCode, HeaderMap)) -> Self {
        Reply::Data {
            payload: payload.into(),
            status,
            headers,
        }
    }
}

/// Serialize to JSON; `pretty` indents with four spaces. Object keys come out sorted.
pub fn render_json<T: Serialize>(value: &T, pretty: bool) -> Vec<u8> {
    if !pretty {
        return serde_json::to_vec(value).unwrap_or_default();
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    match value.serialize(&mut ser) {
        Ok(()) => buf,
        Err(_) => serde_json::to_vec(value).unwrap_or_default(),
    }
}

/// Build a JSON response. `None` gives an empty body; the content type is always JSON.
pub fn json_response(status: StatusCode, body: Option<&Value>, headers: HeaderMap, pretty: bool) -> Response {
    let bytes = body.map(|v| render_json(v, pretty)).unwrap_or_default();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pretty_output_is_indented_and_sorted() {
        let out = render_json(&json!({"b": 1, "a": [true]}), true);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\n    \"a\": [\n        true\n    ],\n    \"b\": 1\n}"
        );
        assert_eq!(render_json(&json!({"b": 1, "a": 2}), false), br#"{"a":2,"b":1}"#.to_vec());
    }

    #[test]
    fn tuples_unpack() {
        let reply: Reply = (Record::new(), StatusCode::CREATED).into();
        assert!(matches!(reply, Reply::Data { status: StatusCode::CREATED, .. }));

        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static("/api/banks/1"));
        let reply: Reply = ((), StatusCode::NO_CONTENT, headers).into();
        let Reply::Data { payload, headers, .. } = reply else {
            panic!("expected data");
        };
        assert_eq!(payload, Payload::Empty);
        assert_eq!(headers[header::LOCATION], "/api/banks/1");
    }

    #[test]
    fn json_response_sets_content_type() {
        let r = json_response(StatusCode::NO_CONTENT, None, HeaderMap::new(), false);
        assert_eq!(r.headers()[header::CONTENT_TYPE], "application/json");
    }
}
