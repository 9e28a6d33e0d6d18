// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 该模块是服务器的核心组件之一，负责将 TCP 流中读取的原始字节码
//! 解析为强类型的 `Request` 结构体。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、版本）。
//! 2. 常用 HTTP 标头（Headers）的提取。
//! 3. 长连接语义（Keep-Alive）的判定。
//! 4. 依据 `Content-Length` 截取请求体。

use crate::{exception::Exception, param::*};
use log::error;

/// 表示一个完整的 HTTP 请求。
///
/// 该结构体为每次调用独立构建，由处理线程独占，绝不跨连接共享。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, POST, PUT, DELETE, OPTIONS）
    method: HttpRequestMethod,
    /// 请求的资源路径
    path: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 客户端标识字符串
    user_agent: String,
    /// 本次交换后连接是否应当保持
    keep_alive: bool,
    /// 请求体（JSON 文本），无请求体时为空串
    body: String,
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 验证编码：确保请求数据是合法的 UTF-8 字符串。
    /// 2. 解析请求行：提取方法、路径和协议版本。
    /// 3. 迭代解析标头：识别 `User-Agent`, `Connection`, `Content-Length` 等字段。
    /// 4. 判定长连接：HTTP/1.1 默认保持，HTTP/1.0 默认关闭，`Connection` 头可覆盖。
    /// 5. 按 `Content-Length` 截取请求体。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 全局请求 ID，用于在多任务环境下追踪日志。
    ///
    /// # 错误处理
    /// 如果请求格式不符合 HTTP 规范或使用了不支持的方法/版本，将返回相应的 `Exception`。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        // 1. 将字节流转换为字符串，失败则判定为非法的 HTTP 请求
        let request_string = match String::from_utf8(buffer.to_vec()) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        // 分离首部与请求体
        let (head, raw_body) = match request_string.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (request_string.as_str(), ""),
        };

        let request_lines: Vec<&str> = head.split(CRLF).collect();

        // 2. 解析请求行 (e.g., "GET /api/todos HTTP/1.1")
        let first_line_parts: Vec<&str> = request_lines[0].split(" ").collect();

        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_lines[0]);
            return Err(Exception::UnSupportedRequestMethod);
        }

        // 解析方法名
        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "POST" => HttpRequestMethod::Post,
            "PUT" => HttpRequestMethod::Put,
            "DELETE" => HttpRequestMethod::Delete,
            "OPTIONS" => HttpRequestMethod::Options,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        // 解析协议版本
        let version_str = first_line_parts.last().unwrap().to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.0" => HttpVersion::V1_0,
            "HTTP/1.1" => HttpVersion::V1_1,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 解析路径（考虑到路径中可能包含空格的情况，虽然不规范但通过 join 尝试恢复）
        let path = if first_line_parts.len() == 3 {
            first_line_parts[1].to_string()
        } else {
            first_line_parts[1..first_line_parts.len() - 1].join(" ")
        };

        // 3. 迭代各行解析 Headers
        let mut user_agent = "".to_string();
        let mut connection = None;
        let mut content_length: usize = 0;
        for line in &request_lines {
            let line_lower = line.to_lowercase();
            // 处理 User-Agent
            if line_lower.starts_with("user-agent") {
                if let Some(val) = line.split(": ").nth(1) {
                    user_agent = val.to_string();
                }
            }
            // 处理 Connection
            else if line_lower.starts_with("connection:") {
                if let Some(val) = line_lower.split(": ").nth(1) {
                    connection = Some(val.trim().to_string());
                }
            }
            // 处理 Content-Length
            else if line_lower.starts_with("content-length:") {
                if let Some(val) = line.split(": ").nth(1) {
                    content_length = val.trim().parse::<usize>().unwrap_or(0);
                }
            }
        }

        // 4. 长连接判定：协议版本给出默认值，Connection 头可覆盖
        let keep_alive = match connection.as_deref() {
            Some("close") => false,
            Some("keep-alive") => true,
            _ => version == HttpVersion::V1_1,
        };

        // 5. 按 Content-Length 截取请求体
        let body = if content_length > 0 && !raw_body.is_empty() {
            raw_body
                .char_indices()
                .take_while(|(i, _)| *i < content_length)
                .map(|(_, c)| c)
                .collect()
        } else {
            String::new()
        };

        Ok(Self {
            method,
            path,
            version,
            user_agent,
            keep_alive,
            body,
        })
    }
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取 HTTP 协议版本
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取请求路径
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取请求方法
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 获取用户代理字符串
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// 本次交换后连接是否应当保持
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// 获取请求体文本
    pub fn body(&self) -> &str {
        &self.body
    }
}
