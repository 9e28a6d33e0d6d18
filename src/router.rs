// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由模块
//!
//! 该模块把 `(方法, 路径)` 映射为具体操作：校验路径与请求体输入、
//! 驱动数据库会话管理器保证连通性与语句有效性、执行查询，
//! 最后经由字段解码器与响应构建器把结果整形为 HTTP 响应。
//!
//! ## 错误边界
//! 所有数据库层异常都在本模块的最外层按请求捕获并转换为响应，
//! 绝不穿透会话循环——一次数据库故障终结当前请求，但不终结连接。

use crate::db::TodoStore;
use crate::exception::Exception;
use crate::field::{field_to_bool, field_to_i64, field_to_string};
use crate::param::HttpRequestMethod;
use crate::request::Request;
use crate::response::Response;

use log::{debug, warn};
use serde_json::json;
use tokio::sync::Mutex;

/// 请求分发入口。
///
/// 路由表：
///
/// | 匹配 | 动作 | 成功 | 失败 |
/// |---|---|---|---|
/// | `OPTIONS *` | CORS 预检 | 200 空响应体 | — |
/// | `GET /healthz` | 存活探针 | 200 `{"status":"ok"}` | — |
/// | `GET /db/healthz` | 连通性探针 | 200 `{"status":"ok","db":true}` | 500 纯文本 |
/// | `GET /api/todos` | 列表 | 200 JSON 数组（按 id 升序） | 500 纯文本 |
/// | `POST /api/todos` | 创建 | 201 `{id,title,done:false}` | 400 / 500 |
/// | `PUT /api/todos/{id}` | 覆盖写 | 204 空响应体 | 400 / 500 |
/// | `DELETE /api/todos/{id}` | 删除 | 204 空响应体 | 400 / 500 |
/// | 其余 | — | 404 纯文本 `"Not found"` | — |
pub async fn handle_request(
    request: &Request,
    store: &Mutex<TodoStore>,
    origin: &str,
    id: u128,
) -> Response {
    let method = request.method();
    let path = request.path();

    // CORS 预检：任意路径一律 200，带全部 CORS 头
    if method == HttpRequestMethod::Options {
        debug!("[ID{}]CORS预检请求：{}", id, path);
        return Response::empty(200, request, origin);
    }

    let result = match (method, path) {
        (HttpRequestMethod::Get, "/healthz") => {
            Ok(Response::json(200, &json!({"status": "ok"}), request, origin))
        }
        (HttpRequestMethod::Get, "/db/healthz") => db_healthz(request, store, origin, id).await,
        (HttpRequestMethod::Get, "/api/todos") => list_todos(request, store, origin, id).await,
        (HttpRequestMethod::Post, "/api/todos") => create_todo(request, store, origin, id).await,
        (HttpRequestMethod::Put, _) if path.starts_with("/api/todos/") => {
            update_todo(request, store, origin, id).await
        }
        (HttpRequestMethod::Delete, _) if path.starts_with("/api/todos/") => {
            delete_todo(request, store, origin, id).await
        }
        _ => {
            debug!("[ID{}]未匹配的路由：{} {}", id, method, path);
            Ok(Response::text(404, "Not found", request, origin))
        }
    };

    // 最外层错误边界：异常在这里统一转换为 400/500 响应
    match result {
        Ok(response) => response,
        Err(e) => {
            let code = if e.is_client_fault() { 400 } else { 500 };
            warn!("[ID{}]请求处理失败（{}）：{}", id, code, e);
            Response::text(code, &e.to_string(), request, origin)
        }
    }
}

/// `GET /db/healthz`：在锁内保证连通并做一次探活查询。
async fn db_healthz(
    request: &Request,
    store: &Mutex<TodoStore>,
    origin: &str,
    id: u128,
) -> Result<Response, Exception> {
    let mut store = store.lock().await;
    store.ensure_connected(id).await?;
    store.probe().await?;
    Ok(Response::json(
        200,
        &json!({"status": "ok", "db": true}),
        request,
        origin,
    ))
}

/// `GET /api/todos`：执行列表语句，按字段解码器整形每一行。
async fn list_todos(
    request: &Request,
    store: &Mutex<TodoStore>,
    origin: &str,
    id: u128,
) -> Result<Response, Exception> {
    let rows = {
        let mut store = store.lock().await;
        store.ensure_connected(id).await?;
        store.ensure_prepared(id).await?;
        store.list().await?
    };

    let mut todos = Vec::with_capacity(rows.len());
    for row in &rows {
        // 列序与列表语句保持一致：id, title, done, created_at
        let todo_id = field_to_i64(row.as_ref(0).unwrap_or(&mysql_async::Value::NULL))?;
        let title = field_to_string(row.as_ref(1).unwrap_or(&mysql_async::Value::NULL));
        let done = field_to_bool(row.as_ref(2).unwrap_or(&mysql_async::Value::NULL));
        let created_at = field_to_string(row.as_ref(3).unwrap_or(&mysql_async::Value::NULL));
        todos.push(json!({
            "id": todo_id,
            "title": title,
            "done": done,
            "created_at": created_at,
        }));
    }
    debug!("[ID{}]列表查询返回{}条记录", id, todos.len());
    Ok(Response::json(200, &json!(todos), request, origin))
}

/// `POST /api/todos`：要求请求体是带字符串 `title` 的 JSON 对象。
/// 插入与取回自增 id 在同一次锁持有期内完成，取回的 id 原样回显。
async fn create_todo(
    request: &Request,
    store: &Mutex<TodoStore>,
    origin: &str,
    id: u128,
) -> Result<Response, Exception> {
    let body: serde_json::Value =
        serde_json::from_str(request.body()).map_err(|_| Exception::InvalidJson)?;
    let object = body.as_object().ok_or(Exception::InvalidJson)?;
    let title = object
        .get("title")
        .and_then(|v| v.as_str())
        .ok_or(Exception::TitleRequired)?
        .to_string();

    let row = {
        let mut store = store.lock().await;
        store.ensure_connected(id).await?;
        store.ensure_prepared(id).await?;
        store.insert(&title).await?
    };
    let todo_id = field_to_i64(row.as_ref(0).unwrap_or(&mysql_async::Value::NULL))?;

    debug!("[ID{}]创建待办事项成功，id={}", id, todo_id);
    Ok(Response::json(
        201,
        &json!({"id": todo_id, "title": title, "done": false}),
        request,
        origin,
    ))
}

/// `PUT /api/todos/{id}`：整体覆盖写。
///
/// `title` 与 `done` 均为可选字段，缺省时分别落为**空串**与 `false`——
/// 没有部分更新合并，这是可复现的既定行为而非疏漏。
async fn update_todo(
    request: &Request,
    store: &Mutex<TodoStore>,
    origin: &str,
    id: u128,
) -> Result<Response, Exception> {
    let todo_id = parse_path_id(request.path())?;
    let body: serde_json::Value =
        serde_json::from_str(request.body()).map_err(|_| Exception::InvalidJson)?;
    let object = body.as_object().ok_or(Exception::InvalidJson)?;
    let title = object
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let done = object.get("done").and_then(|v| v.as_bool()).unwrap_or(false);

    let mut store = store.lock().await;
    store.ensure_connected(id).await?;
    store.ensure_prepared(id).await?;
    store.update(todo_id, &title, done).await?;

    debug!("[ID{}]更新待办事项成功，id={}", id, todo_id);
    Ok(Response::empty(204, request, origin))
}

/// `DELETE /api/todos/{id}`：无存在性检查，重复删除在 HTTP 层幂等。
async fn delete_todo(
    request: &Request,
    store: &Mutex<TodoStore>,
    origin: &str,
    id: u128,
) -> Result<Response, Exception> {
    let todo_id = parse_path_id(request.path())?;

    let mut store = store.lock().await;
    store.ensure_connected(id).await?;
    store.ensure_prepared(id).await?;
    store.delete(todo_id).await?;

    debug!("[ID{}]删除待办事项成功，id={}", id, todo_id);
    Ok(Response::empty(204, request, origin))
}

/// 校验并解析 `/api/todos/` 之后的 id 段。
///
/// id 段必须全部由十进制数字字符组成；出现任何其它字符都在触碰数据库之前
/// 以 [`Exception::InvalidId`] 拒绝。
fn parse_path_id(path: &str) -> Result<i64, Exception> {
    let segment = path
        .strip_prefix("/api/todos/")
        .ok_or(Exception::InvalidId)?;
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Exception::InvalidId);
    }
    segment.parse::<i64>().map_err(|_| Exception::InvalidId)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TodoStore;
    use crate::request::Request;
    use tokio::sync::Mutex;

    fn test_store() -> Mutex<TodoStore> {
        // 这些测试只覆盖不触碰数据库的分支，端点无需可达
        Mutex::new(TodoStore::new("127.0.0.1", 3306, "root", "", "todo"))
    }

    fn request_of(raw: &str) -> Request {
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    /// 数字 id 正常解析，任何非数字字符在触碰数据库之前被拒绝
    #[test]
    fn test_parse_path_id() {
        assert_eq!(parse_path_id("/api/todos/1").unwrap(), 1);
        assert_eq!(parse_path_id("/api/todos/123456").unwrap(), 123456);

        for bad in [
            "/api/todos/12a",
            "/api/todos/abc",
            "/api/todos/",
            "/api/todos/-1",
            "/api/todos/1.5",
            "/api/todos/1;DROP TABLE todos",
        ] {
            assert!(matches!(parse_path_id(bad), Err(Exception::InvalidId)));
        }
    }

    /// OPTIONS 对任意路径（含不存在的路径）一律 200 并带 CORS 头
    #[tokio::test]
    async fn test_options_any_path() {
        let store = test_store();
        for raw in [
            "OPTIONS * HTTP/1.1\r\nHost: x\r\n\r\n",
            "OPTIONS /api/todos HTTP/1.1\r\nHost: x\r\n\r\n",
            "OPTIONS /no/such/path HTTP/1.1\r\nHost: x\r\n\r\n",
        ] {
            let request = request_of(raw);
            let response = handle_request(&request, &store, "*", 0).await;
            assert_eq!(response.status_code(), 200);
            let text = String::from_utf8_lossy(&response.as_bytes()).to_string();
            assert!(text.contains("Access-Control-Allow-Origin: *"));
            assert!(text.contains("Access-Control-Allow-Methods: GET, POST, PUT, DELETE, OPTIONS"));
            assert!(text.contains("Access-Control-Allow-Headers: Content-Type, Accept"));
        }
    }

    /// 存活探针不依赖数据库
    #[tokio::test]
    async fn test_healthz() {
        let store = test_store();
        let request = request_of("GET /healthz HTTP/1.1\r\nHost: x\r\n\r\n");
        let response = handle_request(&request, &store, "*", 0).await;

        assert_eq!(response.status_code(), 200);
        let text = String::from_utf8_lossy(&response.as_bytes()).to_string();
        assert!(text.ends_with(r#"{"status":"ok"}"#));
    }

    /// 未匹配的路由返回 404 纯文本
    #[tokio::test]
    async fn test_not_found() {
        let store = test_store();
        for raw in [
            "GET /no/such/path HTTP/1.1\r\nHost: x\r\n\r\n",
            "POST /healthz HTTP/1.1\r\nHost: x\r\n\r\n",
            "GET /api/todos/1 HTTP/1.1\r\nHost: x\r\n\r\n",
        ] {
            let request = request_of(raw);
            let response = handle_request(&request, &store, "*", 0).await;
            assert_eq!(response.status_code(), 404);
            let text = String::from_utf8_lossy(&response.as_bytes()).to_string();
            assert!(text.ends_with("Not found"));
        }
    }

    /// 非数字 id 在触碰数据库之前返回 400 "invalid id"
    #[tokio::test]
    async fn test_invalid_id_before_database() {
        let store = test_store();
        for raw in [
            "PUT /api/todos/12a HTTP/1.1\r\nHost: x\r\nContent-Length: 2\r\n\r\n{}",
            "DELETE /api/todos/abc HTTP/1.1\r\nHost: x\r\n\r\n",
        ] {
            let request = request_of(raw);
            let response = handle_request(&request, &store, "*", 0).await;
            assert_eq!(response.status_code(), 400);
            let text = String::from_utf8_lossy(&response.as_bytes()).to_string();
            assert!(text.ends_with("invalid id"));
        }
    }

    /// 非法 JSON 与缺失 title 分别得到约定的 400 文本
    #[tokio::test]
    async fn test_post_validation() {
        let store = test_store();

        let raw = "POST /api/todos HTTP/1.1\r\nHost: x\r\nContent-Length: 8\r\n\r\nnot json";
        let response = handle_request(&request_of(raw), &store, "*", 0).await;
        assert_eq!(response.status_code(), 400);
        assert!(String::from_utf8_lossy(&response.as_bytes()).ends_with("invalid JSON"));

        let raw = "POST /api/todos HTTP/1.1\r\nHost: x\r\nContent-Length: 13\r\n\r\n{\"done\":true}";
        let response = handle_request(&request_of(raw), &store, "*", 0).await;
        assert_eq!(response.status_code(), 400);
        assert!(String::from_utf8_lossy(&response.as_bytes()).ends_with("title required"));

        let raw = "POST /api/todos HTTP/1.1\r\nHost: x\r\nContent-Length: 12\r\n\r\n{\"title\":42}";
        let response = handle_request(&request_of(raw), &store, "*", 0).await;
        assert_eq!(response.status_code(), 400);
        assert!(String::from_utf8_lossy(&response.as_bytes()).ends_with("title required"));
    }

    /// PUT 的请求体必须是 JSON 对象
    #[tokio::test]
    async fn test_put_invalid_json() {
        let store = test_store();
        let raw = "PUT /api/todos/1 HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\n[1]x";
        let response = handle_request(&request_of(raw), &store, "*", 0).await;

        assert_eq!(response.status_code(), 400);
        assert!(String::from_utf8_lossy(&response.as_bytes()).ends_with("invalid JSON"));
    }
}
