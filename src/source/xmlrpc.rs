// src/source/xmlrpc.rs
//! Minimal XML-RPC client for the MoinMoin `getRecentChanges` call.
//!
//! Only what the wiki API needs: encoding a method call with scalar/compound
//! params and decoding a `<methodResponse>` (or `<fault>`) into a [`Value`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::{ChangeRecord, RemoteChangeSource, DEFAULT_API};
use crate::error::{SourceFailure, UnreachableSourceError, XmlRpcError};

/// Wire format of `dateTime.iso8601` as emitted by Python's xmlrpc.
const DATETIME_FORMAT: &str = "%Y%m%dT%H:%M:%S";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Decoded XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    Double(f64),
    DateTime(DateTime<Utc>),
    Base64(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

// ------------------------------------------------------------
// Encoding
// ------------------------------------------------------------

/// Build a complete `<methodCall>` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    // write! into a String cannot fail
    match value {
        Value::String(s) => {
            let _ = write!(out, "<string>{}</string>", escape(s));
        }
        Value::Int(i) => {
            let _ = write!(out, "<int>{i}</int>");
        }
        Value::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }
        Value::Double(d) => {
            let _ = write!(out, "<double>{d}</double>");
        }
        Value::DateTime(dt) => {
            let _ = write!(
                out,
                "<dateTime.iso8601>{}</dateTime.iso8601>",
                dt.format(DATETIME_FORMAT)
            );
        }
        Value::Base64(s) => {
            let _ = write!(out, "<base64>{}</base64>", escape(s));
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(fields) => {
            out.push_str("<struct>");
            for (name, field) in fields {
                let _ = write!(out, "<member><name>{}</name>", escape(name));
                encode_value(out, field);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

// ------------------------------------------------------------
// Decoding
// ------------------------------------------------------------

/// Decode a `<methodResponse>`. A `<fault>` becomes [`XmlRpcError::Fault`].
pub fn parse_response(xml: &str) -> Result<Value, XmlRpcError> {
    let mut p = Parser::new(xml);
    p.expect_start(b"methodResponse")?;
    match p.next()? {
        Event::Start(e) if e.name().as_ref() == b"params" => {
            p.expect_start(b"param")?;
            let value = p.value()?;
            p.expect_end(b"param")?;
            p.expect_end(b"params")?;
            Ok(value)
        }
        Event::Start(e) if e.name().as_ref() == b"fault" => Err(fault_from(p.value()?)),
        other => Err(unexpected("<params> or <fault>", &other)),
    }
}

/// Parse a `dateTime.iso8601` payload. Values without an offset are taken as UTC.
pub fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, XmlRpcError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = s.strip_suffix('Z').unwrap_or(s);
    for fmt in [DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y%m%dT%H%M%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(dt.and_utc());
        }
    }
    Err(XmlRpcError::BadDateTime(raw.to_string()))
}

/// Convert a `getRecentChanges` result (array of structs) into change records.
pub fn change_records(value: Value) -> Result<Vec<ChangeRecord>, XmlRpcError> {
    let Value::Array(items) = value else {
        return Err(XmlRpcError::Malformed(
            "getRecentChanges did not return an array".into(),
        ));
    };
    items.into_iter().map(change_record).collect()
}

fn change_record(item: Value) -> Result<ChangeRecord, XmlRpcError> {
    let Value::Struct(mut fields) = item else {
        return Err(XmlRpcError::Malformed("change entry is not a struct".into()));
    };
    let author = take_string(&mut fields, "author")?;
    let page_name = take_string(&mut fields, "name")?;
    let last_modified = match fields.remove("lastModified") {
        Some(Value::DateTime(dt)) => dt,
        Some(Value::String(s)) => parse_datetime(&s)?,
        _ => {
            return Err(XmlRpcError::Malformed(
                "change entry without lastModified".into(),
            ))
        }
    };
    Ok(ChangeRecord {
        author,
        page_name,
        last_modified,
    })
}

fn take_string(fields: &mut BTreeMap<String, Value>, key: &str) -> Result<String, XmlRpcError> {
    match fields.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(XmlRpcError::Malformed(format!(
            "change entry without string '{key}'"
        ))),
    }
}

fn fault_from(value: Value) -> XmlRpcError {
    let Value::Struct(fields) = value else {
        return XmlRpcError::Malformed("fault without struct".into());
    };
    let code = match fields.get("faultCode") {
        Some(Value::Int(c)) => *c,
        _ => 0,
    };
    let message = match fields.get("faultString") {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    XmlRpcError::Fault { code, message }
}

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> Parser<'a> {
    fn new(xml: &'a str) -> Self {
        Self {
            reader: Reader::from_str(xml),
        }
    }

    /// Next structural event: skips declarations, comments and blank text.
    fn next(&mut self) -> Result<Event<'a>, XmlRpcError> {
        loop {
            match self.reader.read_event()? {
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Text(t) if is_blank(&t) => {}
                Event::Eof => {
                    return Err(XmlRpcError::Malformed("unexpected end of document".into()))
                }
                ev => return Ok(ev),
            }
        }
    }

    fn expect_start(&mut self, tag: &[u8]) -> Result<(), XmlRpcError> {
        match self.next()? {
            Event::Start(e) if e.name().as_ref() == tag => Ok(()),
            other => Err(unexpected(&format!("<{}>", lossy(tag)), &other)),
        }
    }

    fn expect_end(&mut self, tag: &[u8]) -> Result<(), XmlRpcError> {
        match self.next()? {
            Event::End(e) if e.name().as_ref() == tag => Ok(()),
            other => Err(unexpected(&format!("</{}>", lossy(tag)), &other)),
        }
    }

    /// A whole `<value>...</value>` element.
    fn value(&mut self) -> Result<Value, XmlRpcError> {
        match self.next()? {
            Event::Start(e) if e.name().as_ref() == b"value" => self.value_body(),
            Event::Empty(e) if e.name().as_ref() == b"value" => Ok(Value::String(String::new())),
            other => Err(unexpected("<value>", &other)),
        }
    }

    /// Content of a `<value>` whose start tag was consumed, through `</value>`.
    /// Text without a type element is a string.
    fn value_body(&mut self) -> Result<Value, XmlRpcError> {
        let mut untyped = String::new();
        loop {
            match self.reader.read_event()? {
                Event::Text(t) => untyped.push_str(&t.unescape()?),
                Event::CData(c) => untyped.push_str(&String::from_utf8_lossy(&c)),
                Event::Comment(_) => {}
                Event::End(e) if e.name().as_ref() == b"value" => {
                    return Ok(Value::String(untyped))
                }
                Event::Start(e) => {
                    let value = self.typed(e.name().as_ref())?;
                    self.expect_end(b"value")?;
                    return Ok(value);
                }
                Event::Empty(e) => {
                    let value = empty_typed(e.name().as_ref())?;
                    self.expect_end(b"value")?;
                    return Ok(value);
                }
                other => return Err(unexpected("value content", &other)),
            }
        }
    }

    fn typed(&mut self, tag: &[u8]) -> Result<Value, XmlRpcError> {
        let value = match tag {
            b"string" => Value::String(self.text_until(tag)?),
            b"int" | b"i4" | b"i8" => {
                let raw = self.text_until(tag)?;
                Value::Int(raw.trim().parse().map_err(|_| {
                    XmlRpcError::Malformed(format!("invalid integer `{raw}`"))
                })?)
            }
            b"boolean" => match self.text_until(tag)?.trim() {
                "1" | "true" => Value::Bool(true),
                "0" | "false" => Value::Bool(false),
                raw => return Err(XmlRpcError::Malformed(format!("invalid boolean `{raw}`"))),
            },
            b"double" => {
                let raw = self.text_until(tag)?;
                Value::Double(raw.trim().parse().map_err(|_| {
                    XmlRpcError::Malformed(format!("invalid double `{raw}`"))
                })?)
            }
            b"dateTime.iso8601" => Value::DateTime(parse_datetime(&self.text_until(tag)?)?),
            b"base64" => Value::Base64(self.text_until(tag)?.trim().to_string()),
            b"nil" => {
                self.text_until(tag)?;
                Value::Nil
            }
            b"array" => self.array()?,
            b"struct" => self.members()?,
            other => {
                return Err(XmlRpcError::Malformed(format!(
                    "unknown value type <{}>",
                    lossy(other)
                )))
            }
        };
        Ok(value)
    }

    /// Concatenated text up to the closing `tag`.
    fn text_until(&mut self, tag: &[u8]) -> Result<String, XmlRpcError> {
        let mut out = String::new();
        loop {
            match self.reader.read_event()? {
                Event::Text(t) => out.push_str(&t.unescape()?),
                Event::CData(c) => out.push_str(&String::from_utf8_lossy(&c)),
                Event::Comment(_) => {}
                Event::End(e) if e.name().as_ref() == tag => return Ok(out),
                other => return Err(unexpected(&format!("</{}>", lossy(tag)), &other)),
            }
        }
    }

    fn array(&mut self) -> Result<Value, XmlRpcError> {
        let mut items = Vec::new();
        match self.next()? {
            Event::Empty(e) if e.name().as_ref() == b"data" => {}
            Event::Start(e) if e.name().as_ref() == b"data" => loop {
                match self.next()? {
                    Event::Start(e) if e.name().as_ref() == b"value" => {
                        items.push(self.value_body()?)
                    }
                    Event::Empty(e) if e.name().as_ref() == b"value" => {
                        items.push(Value::String(String::new()))
                    }
                    Event::End(e) if e.name().as_ref() == b"data" => break,
                    other => return Err(unexpected("<value> or </data>", &other)),
                }
            },
            other => return Err(unexpected("<data>", &other)),
        }
        self.expect_end(b"array")?;
        Ok(Value::Array(items))
    }

    fn members(&mut self) -> Result<Value, XmlRpcError> {
        let mut fields = BTreeMap::new();
        loop {
            match self.next()? {
                Event::Start(e) if e.name().as_ref() == b"member" => {
                    self.expect_start(b"name")?;
                    let name = self.text_until(b"name")?;
                    let value = self.value()?;
                    self.expect_end(b"member")?;
                    fields.insert(name, value);
                }
                Event::End(e) if e.name().as_ref() == b"struct" => {
                    return Ok(Value::Struct(fields))
                }
                other => return Err(unexpected("<member> or </struct>", &other)),
            }
        }
    }
}

fn empty_typed(tag: &[u8]) -> Result<Value, XmlRpcError> {
    match tag {
        b"string" => Ok(Value::String(String::new())),
        b"base64" => Ok(Value::Base64(String::new())),
        b"nil" => Ok(Value::Nil),
        b"array" => Ok(Value::Array(Vec::new())),
        b"struct" => Ok(Value::Struct(BTreeMap::new())),
        other => Err(XmlRpcError::Malformed(format!(
            "empty <{}/> carries no value",
            lossy(other)
        ))),
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn unexpected(expected: &str, got: &Event<'_>) -> XmlRpcError {
    let found = match got {
        Event::Start(e) => format!("<{}>", lossy(e.name().as_ref())),
        Event::End(e) => format!("</{}>", lossy(e.name().as_ref())),
        Event::Empty(e) => format!("<{}/>", lossy(e.name().as_ref())),
        Event::Text(_) | Event::CData(_) => "text".to_string(),
        Event::Eof => "end of document".to_string(),
        _ => "markup".to_string(),
    };
    XmlRpcError::Malformed(format!("expected {expected}, found {found}"))
}

// ------------------------------------------------------------
// Source
// ------------------------------------------------------------

/// HTTP client shared by all wiki sources of a report run, with a user agent
/// and connect/request timeouts. A timed-out call is a transport failure.
pub fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("wiki-stats/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
}

/// `getRecentChanges` over XML-RPC, either against a live wiki or a canned response.
pub struct XmlRpcSource {
    target: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http(reqwest::Client),
}

impl XmlRpcSource {
    /// `url` is the wiki base URL, `api` the suffix appended to it (default [`DEFAULT_API`]).
    pub fn new(url: &str, api: Option<&str>, client: reqwest::Client) -> Self {
        Self {
            target: call_target(url, api),
            mode: Mode::Http(client),
        }
    }

    /// Answers every fetch with the given `<methodResponse>` document.
    pub fn from_fixture(url: &str, api: Option<&str>, xml: &str) -> Self {
        Self {
            target: call_target(url, api),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    async fn post(&self, client: &reqwest::Client, body: String) -> Result<String, reqwest::Error> {
        client
            .post(&self.target)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

fn call_target(url: &str, api: Option<&str>) -> String {
    format!("{url}{}", api.unwrap_or(DEFAULT_API))
}

#[async_trait]
impl RemoteChangeSource for XmlRpcSource {
    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<ChangeRecord>, UnreachableSourceError> {
        let unreachable = |cause: SourceFailure| UnreachableSourceError::new(&self.target, cause);

        let response = match &self.mode {
            Mode::Fixture(xml) => xml.clone(),
            Mode::Http(client) => {
                let body = encode_call("getRecentChanges", &[Value::DateTime(since)]);
                tracing::debug!(endpoint = %self.target, %since, "calling getRecentChanges");
                self.post(client, body)
                    .await
                    .map_err(|e| unreachable(e.into()))?
            }
        };

        parse_response(&response)
            .and_then(change_records)
            .map_err(|e| unreachable(e.into()))
    }

    fn endpoint(&self) -> &str {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RESPONSE: &str = r#"<?xml version="1.0"?>
<methodResponse>
  <params>
    <param>
      <value><array><data>
        <value><struct>
          <member><name>name</name><value><string>FrontPage</string></value></member>
          <member><name>author</name><value>alice</value></member>
          <member><name>version</name><value><int>7</int></value></member>
          <member><name>lastModified</name><value><dateTime.iso8601>20240115T10:30:00</dateTime.iso8601></value></member>
        </struct></value>
        <value><struct>
          <member><name>name</name><value><string>Tom &amp; Jerry</string></value></member>
          <member><name>author</name><value><string>bob</string></value></member>
          <member><name>lastModified</name><value><dateTime.iso8601>20240110T08:00:00</dateTime.iso8601></value></member>
        </struct></value>
      </data></array></value>
    </param>
  </params>
</methodResponse>"#;

    #[test]
    fn encodes_since_as_xmlrpc_datetime() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let xml = encode_call("getRecentChanges", &[Value::DateTime(since)]);
        assert!(xml.contains("<methodName>getRecentChanges</methodName>"));
        assert!(xml.contains("<dateTime.iso8601>20240101T00:00:00</dateTime.iso8601>"));
    }

    #[test]
    fn encoded_call_escapes_text() {
        let xml = encode_call("echo", &[Value::String("a<b & c".into())]);
        assert!(xml.contains("<string>a&lt;b &amp; c</string>"));
    }

    #[test]
    fn decodes_recent_changes() {
        let records = change_records(parse_response(RESPONSE).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].author, "alice"); // untyped value is a string
        assert_eq!(records[0].page_name, "FrontPage");
        assert_eq!(
            records[0].last_modified,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
        );
        assert_eq!(records[1].page_name, "Tom & Jerry");
    }

    #[test]
    fn decodes_scalars_and_empty_array() {
        let xml = r#"<methodResponse><params><param><value><struct>
            <member><name>n</name><value><i4>-3</i4></value></member>
            <member><name>b</name><value><boolean>1</boolean></value></member>
            <member><name>d</name><value><double>1.5</double></value></member>
            <member><name>z</name><value><nil/></value></member>
            <member><name>a</name><value><array><data/></array></value></member>
        </struct></value></param></params></methodResponse>"#;
        let Value::Struct(fields) = parse_response(xml).unwrap() else {
            panic!("expected struct");
        };
        assert_eq!(fields["n"], Value::Int(-3));
        assert_eq!(fields["b"], Value::Bool(true));
        assert_eq!(fields["d"], Value::Double(1.5));
        assert_eq!(fields["z"], Value::Nil);
        assert_eq!(fields["a"], Value::Array(Vec::new()));
    }

    #[test]
    fn fault_response_is_an_error() {
        let xml = r#"<?xml version="1.0"?>
<methodResponse><fault><value><struct>
  <member><name>faultCode</name><value><int>1</int></value></member>
  <member><name>faultString</name><value><string>No such method</string></value></member>
</struct></value></fault></methodResponse>"#;
        match parse_response(xml) {
            Err(XmlRpcError::Fault { code, message }) => {
                assert_eq!(code, 1);
                assert_eq!(message, "No such method");
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn html_error_page_is_malformed() {
        let err = parse_response("<html><body>Not Found</body></html>").unwrap_err();
        assert!(matches!(err, XmlRpcError::Malformed(_)), "{err:?}");
    }

    #[test]
    fn record_without_author_is_rejected() {
        let value = Value::Array(vec![Value::Struct(BTreeMap::from([(
            "name".to_string(),
            Value::String("A".into()),
        )]))]);
        assert!(change_records(value).is_err());
    }

    #[test]
    fn datetime_variants() {
        let want = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_datetime("20240201T12:00:00").unwrap(), want);
        assert_eq!(parse_datetime("2024-02-01T12:00:00Z").unwrap(), want);
        assert_eq!(parse_datetime("2024-02-01T13:00:00+01:00").unwrap(), want);
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn http_client_builds_with_timeouts() {
        assert!(http_client().is_ok());
    }

    #[test]
    fn default_api_suffix_is_appended() {
        let src = XmlRpcSource::from_fixture("http://moinmo.in/", None, RESPONSE);
        assert_eq!(src.endpoint(), "http://moinmo.in/?action=xmlrpc2");
        let src = XmlRpcSource::from_fixture("http://moinmo.in/", Some("RPC2"), RESPONSE);
        assert_eq!(src.endpoint(), "http://moinmo.in/RPC2");
    }

    #[tokio::test]
    async fn fixture_fault_surfaces_as_unreachable() {
        let xml = "<methodResponse><fault><value><struct></struct></value></fault></methodResponse>";
        let src = XmlRpcSource::from_fixture("http://wiki.test/", None, xml);
        let err = src.fetch(Utc::now()).await.unwrap_err();
        assert_eq!(err.url, "http://wiki.test/?action=xmlrpc2");
        assert!(matches!(
            err.cause,
            SourceFailure::Protocol(XmlRpcError::Fault { .. })
        ));
    }
}
