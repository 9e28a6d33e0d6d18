// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了 `todoserver` 遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - CORS 响应头的固定取值。
//! - HTTP 方法与版本的强类型枚举。
//! - 五条预编译 SQL 语句的文本。

use lazy_static::lazy_static;
use std::collections::HashMap;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "todoserver";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// CORS 允许的方法列表，固定值
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

/// CORS 允许的请求头列表，固定值
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, Accept";

/// 会话空闲读取超时（秒），超时后连接被关闭
pub const IDLE_TIMEOUT_SECS: u64 = 30;

// --- 预编译语句文本 ---
// 五条语句构成一个整体：它们要么全部在当前连接上有效，要么被整体重新编译。

/// 列出全部待办事项，按 id 升序
pub const SQL_LIST: &str = "SELECT id, title, done, \
    DATE_FORMAT(created_at, '%Y-%m-%d %H:%i:%s') AS created_at \
    FROM todos ORDER BY id";

/// 插入新待办事项，done 默认为 false
pub const SQL_INSERT: &str = "INSERT INTO todos(title, done) VALUES(?, false)";

/// 按 id 覆盖写 title 与 done
pub const SQL_UPDATE: &str = "UPDATE todos SET title=?, done=? WHERE id=?";

/// 按 id 删除
pub const SQL_DELETE: &str = "DELETE FROM todos WHERE id=?";

/// 取回刚刚生成的自增 id
pub const SQL_LAST_ID: &str = "SELECT LAST_INSERT_ID()";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(204, "No Content");

        // 3xx: 重定向 (Redirection)
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(304, "Not Modified");

        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(408, "Request Timeout");
        map.insert(411, "Length Required");
        map.insert(413, "Content Too Large");
        map.insert(415, "Unsupported Media Type");

        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(503, "Service Unavailable");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.0 版本，默认短连接
    V1_0,
    /// HTTP/1.1 版本，默认长连接
    V1_1,
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpRequestMethod {
    /// 获取资源
    Get,
    /// 提交数据或执行操作
    Post,
    /// 整体覆盖资源
    Put,
    /// 删除资源
    Delete,
    /// 查询服务器支持的选项（CORS 预检）
    Options,
}

use std::fmt;

impl fmt::Display for HttpVersion {
    /// 将枚举格式化为 HTTP 报文中的版本字符串
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "1.0"),
            HttpVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Post => write!(f, "POST"),
            HttpRequestMethod::Put => write!(f, "PUT"),
            HttpRequestMethod::Delete => write!(f, "DELETE"),
            HttpRequestMethod::Options => write!(f, "OPTIONS"),
        }
    }
}
