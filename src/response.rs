use crate::{param::*, request::Request};

use bytes::Bytes;
use chrono::prelude::*;
use log::error;

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    date: DateTime<Utc>,
    server_name: String,
    cors_origin: String,
    keep_alive: bool,
    content: Option<Bytes>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: 0,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            cors_origin: "*".to_string(),
            keep_alive: false,
            content: None,
        }
    }

    /// 构建 JSON 响应，`Content-Type: application/json`
    pub fn json(code: u16, body: &serde_json::Value, request: &Request, origin: &str) -> Self {
        let serialized = body.to_string();
        let bytes = Bytes::from(serialized);
        let mut response = Self::new();
        response.content_length = bytes.len() as u64;
        response.content = Some(bytes);
        response.content_type = Some("application/json".to_string());
        response
            .set_code(code)
            .set_date()
            .set_version(request)
            .set_cors(origin)
            .set_keep_alive(request.keep_alive())
            .to_owned()
    }

    /// 构建纯文本响应，`Content-Type: text/plain; charset=utf-8`
    pub fn text(code: u16, body: &str, request: &Request, origin: &str) -> Self {
        let bytes = Bytes::from(body.to_string());
        let mut response = Self::new();
        response.content_length = bytes.len() as u64;
        response.content = Some(bytes);
        response.content_type = Some("text/plain; charset=utf-8".to_string());
        response
            .set_code(code)
            .set_date()
            .set_version(request)
            .set_cors(origin)
            .set_keep_alive(request.keep_alive())
            .to_owned()
    }

    /// 构建空响应体的响应（OPTIONS 预检、204 等场景）
    pub fn empty(code: u16, request: &Request, origin: &str) -> Self {
        Self::new()
            .set_code(code)
            .set_date()
            .set_version(request)
            .set_cors(origin)
            .set_keep_alive(request.keep_alive())
            .to_owned()
    }

    /// 请求解析失败时的兜底响应：无法得知对端意图，连接一律关闭。
    ///
    /// 报文连请求行都无法解析时，对端的协议版本同样无从得知，
    /// 版本固定落在 `Self::new()` 给出的 HTTP/1.1 默认值上。
    pub fn bad_request(origin: &str) -> Self {
        let bytes = Bytes::from("Bad Request");
        let mut response = Self::new();
        response.content_length = bytes.len() as u64;
        response.content = Some(bytes);
        response.content_type = Some("text/plain; charset=utf-8".to_string());
        response
            .set_code(400)
            .set_date()
            .set_cors(origin)
            .set_keep_alive(false)
            .to_owned()
    }

    fn set_date(&mut self) -> &mut Self {
        self.date = Utc::now();
        self
    }

    fn set_version(&mut self, request: &Request) -> &mut Self {
        self.version = *request.version();
        self
    }

    fn set_cors(&mut self, origin: &str) -> &mut Self {
        self.cors_origin = origin.to_string();
        self
    }

    fn set_keep_alive(&mut self, keep_alive: bool) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&information) => information.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                panic!();
            }
        };
        self
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let status_code: &str = &self.status_code.to_string();
        let information: &str = &self.information;
        let content_length: &str = &self.content_length.to_string();
        let date: &str = &format_date(&self.date);
        let server: &str = &self.server_name;

        let header = [
            version,
            " ",
            status_code,
            " ",
            information,
            CRLF,
            match &self.content_type {
                Some(t) => ["Content-Type: ", t, CRLF].concat(),
                None => "".to_string(),
            }
            .as_str(),
            "Content-Length: ",
            content_length,
            CRLF,
            "Date: ",
            date,
            CRLF,
            "Server: ",
            server,
            CRLF,
            // 三个 CORS 头出现在每一个响应中，无论结果如何
            "Access-Control-Allow-Origin: ",
            &self.cors_origin,
            CRLF,
            "Access-Control-Allow-Methods: ",
            CORS_ALLOW_METHODS,
            CRLF,
            "Access-Control-Allow-Headers: ",
            CORS_ALLOW_HEADERS,
            CRLF,
            "Connection: ",
            match self.keep_alive {
                true => "keep-alive",
                false => "close",
            },
            CRLF,
            CRLF,
        ]
        .concat();
        [
            header.as_bytes(),
            match &self.content {
                Some(c) => c,
                None => b"",
            },
        ]
        .concat()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}
