// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器在请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖了协议解析错误、客户端输入校验错误以及数据库层错误。
//! - **语义映射**：每个变体都对应了特定的业务逻辑，便于上层模块将其转化为对应的
//!   HTTP 响应状态码——校验类错误映射为 400，数据库/解码类错误映射为 500。
//! - **用户友好**：通过实现 `std::fmt::Display`，确保错误信息可以被安全地记录到日志
//!   或作为纯文本响应体返回给客户端。

use std::fmt;

/// 服务器处理请求过程中发生的异常类型。
///
/// 该枚举通常作为 `Result` 的 `Err` 部分返回，用于指示处理失败的具体原因。
/// 数据库层的异常一律在路由层被捕获并转换为响应，不会穿透会话循环。
#[derive(Debug, Clone)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 客户端使用了服务器暂不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本（例如：HTTP/0.9 或过高的版本）。
    UnsupportedHttpVersion,
    /// 路径中的 id 段包含非数字字符。对应 `400 Bad Request`，在触碰数据库之前返回。
    InvalidId,
    /// 请求体不是合法的 JSON 对象。对应 `400 Bad Request`。
    InvalidJson,
    /// 创建待办事项时缺少字符串类型的 `title` 字段。对应 `400 Bad Request`。
    TitleRequired,
    /// 解析完所有候选端点后仍然无法建立数据库连接。对应 `500 Internal Server Error`。
    /// 会话保持断开状态，下一个请求会触发新一轮重连。
    ConnectionError(String),
    /// 数据库查询执行失败。对应 `500`。连接本身不会因此被拆除，
    /// 而是留待下一个请求通过 `ensure_connected` 惰性复核。
    DbError(String),
    /// 列值无法被强制转换为调用方要求的数值类型。对应 `500`，视为意外情况而非客户端错误。
    TypeError(&'static str),
}

use Exception::*;

/// 为 `Exception` 实现 `Display` 特性，使其支持字符串格式化输出。
///
/// 校验类变体的文本会被直接写入 400 响应体，因此保持与前端约定一致。
impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            InvalidId => write!(f, "invalid id"),
            InvalidJson => write!(f, "invalid JSON"),
            TitleRequired => write!(f, "title required"),
            ConnectionError(detail) => write!(f, "db error: {}", detail),
            DbError(detail) => write!(f, "db error: {}", detail),
            TypeError(detail) => write!(f, "type error: {}", detail),
        }
    }
}

impl Exception {
    /// 判断该异常是否属于客户端输入问题（应映射为 400 而非 500）
    pub fn is_client_fault(&self) -> bool {
        matches!(self, InvalidId | InvalidJson | TitleRequired)
    }
}
