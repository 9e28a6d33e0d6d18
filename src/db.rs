// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 数据库会话管理模块
//!
//! 该模块持有整个进程唯一的一条 MySQL 逻辑连接及其五条预编译语句，
//! 并提供按需重连（reconnect-on-demand）与按需重编译（re-prepare-on-demand）能力。
//!
//! ## 并发约定
//! `TodoStore` 本身不包含锁：它被包装在 `Arc<tokio::sync::Mutex<TodoStore>>` 中共享，
//! 调用方（路由层）在一次数据库交互的全程持有该互斥锁。由此，探活、解析候选端点、
//! 重连、重编译与查询执行对所有并发连接严格串行，共享连接上永远不会同时存在两个
//! 未完成的查询。
//!
//! ## 语句有效性约定
//! 五条语句是一个整体：要么全部在当前连接上有效，要么被视为整体失效并一起重编译。
//! 语句句柄绝不会被用于其编译时所在连接之外的连接世代。

use crate::exception::Exception;
use crate::param::*;

use log::{debug, warn};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Row, Statement};
use tokio::net::lookup_host;

/// 五条预编译语句的句柄集合。整体编译、整体失效。
#[derive(Clone)]
struct Statements {
    list: Statement,
    insert: Statement,
    update: Statement,
    delete: Statement,
    last_id: Statement,
}

/// 数据库会话状态：一条独占连接加五条语句句柄。
///
/// 进程启动时创建一次，由任意请求任务触发的重连/重编译操作原地变更，
/// 与进程同寿命（范围内不存在显式销毁）。
pub struct TodoStore {
    db_host: String,
    db_port: u16,
    db_user: String,
    db_password: String,
    db_name: String,
    conn: Option<Conn>,
    statements: Option<Statements>,
}

impl TodoStore {
    pub fn new(
        db_host: &str,
        db_port: u16,
        db_user: &str,
        db_password: &str,
        db_name: &str,
    ) -> Self {
        Self {
            db_host: db_host.to_string(),
            db_port,
            db_user: db_user.to_string(),
            db_password: db_password.to_string(),
            db_name: db_name.to_string(),
            conn: None,
            statements: None,
        }
    }

    /// 保证当前连接可用。
    ///
    /// 先对现有连接做一次轻量探活（ping）；成功则立即返回。
    /// 任何原因的失败都会进入重连扫描：将配置的 host/port 解析为候选端点集合，
    /// 按解析器返回顺序逐一尝试建连并探活，第一个成功的端点成为活动连接，
    /// 五条语句随即整体在其上重新编译。所有候选端点都失败时返回
    /// [`Exception::ConnectionError`]，会话保持断开状态（不再使用推定已死的旧句柄）。
    ///
    /// 除这一轮扫描外没有额外重试：观察到 `ConnectionError` 的调用方应将其作为
    /// 服务端错误上报，下一个请求会触发新一轮尝试。
    pub async fn ensure_connected(&mut self, id: u128) -> Result<(), Exception> {
        if let Some(conn) = self.conn.as_mut() {
            if conn.ping().await.is_ok() {
                return Ok(());
            }
            debug!("[ID{}]数据库探活失败，进入重连扫描", id);
        }

        // 旧连接（如果有）推定已死，直接丢弃，语句随连接一起整体失效
        self.conn = None;
        self.statements = None;

        let candidates = lookup_host((self.db_host.as_str(), self.db_port))
            .await
            .map_err(|e| {
                Exception::ConnectionError(format!(
                    "resolve {}:{} failed: {}",
                    self.db_host, self.db_port, e
                ))
            })?;

        for addr in candidates {
            debug!("[ID{}]尝试连接数据库端点：{}", id, addr);
            match self.try_endpoint(&addr.ip().to_string(), addr.port()).await {
                Ok((conn, statements)) => {
                    debug!("[ID{}]数据库重连成功：{}", id, addr);
                    self.conn = Some(conn);
                    self.statements = Some(statements);
                    return Ok(());
                }
                Err(e) => {
                    warn!("[ID{}]数据库端点{}连接失败：{}", id, addr, e);
                }
            }
        }

        Err(Exception::ConnectionError(format!(
            "all endpoints for {}:{} failed",
            self.db_host, self.db_port
        )))
    }

    /// 保证五条语句句柄对当前连接世代有效；任一失效则整体重编译，绝不部分编译。
    pub async fn ensure_prepared(&mut self, id: u128) -> Result<(), Exception> {
        if self.statements.is_some() {
            return Ok(());
        }
        debug!("[ID{}]语句句柄失效，整体重新编译", id);
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Exception::ConnectionError("not connected".to_string()))?;
        let statements = Self::prepare_all(conn)
            .await
            .map_err(|e| Exception::ConnectionError(format!("prepare failed: {}", e)))?;
        self.statements = Some(statements);
        Ok(())
    }

    /// 对当前连接做一次探活查询，供 `/db/healthz` 使用。
    pub async fn probe(&mut self) -> Result<(), Exception> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Exception::ConnectionError("not connected".to_string()))?;
        conn.ping()
            .await
            .map_err(|e| Exception::DbError(e.to_string()))
    }

    /// 列出全部待办事项，按 id 升序。行的解码交给路由层的字段解码器。
    pub async fn list(&mut self) -> Result<Vec<Row>, Exception> {
        let (conn, statements) = self.handles()?;
        conn.exec::<Row, _, _>(&statements.list, ())
            .await
            .map_err(|e| Exception::DbError(e.to_string()))
    }

    /// 插入新待办事项并返回承载新 id 的行。
    ///
    /// 插入与取回自增 id 是两条语句，但在同一次锁持有期内顺序执行
    /// （不是同一事务——范围内不存在显式事务边界），因此并发插入不会互相串号。
    pub async fn insert(&mut self, title: &str) -> Result<Row, Exception> {
        let (conn, statements) = self.handles()?;
        conn.exec_drop(&statements.insert, (title,))
            .await
            .map_err(|e| Exception::DbError(e.to_string()))?;
        conn.exec_first::<Row, _, _>(&statements.last_id, ())
            .await
            .map_err(|e| Exception::DbError(e.to_string()))?
            .ok_or_else(|| Exception::DbError("LAST_INSERT_ID() returned no row".to_string()))
    }

    /// 按 id 覆盖写 title 与 done。没有部分更新合并语义。
    pub async fn update(&mut self, todo_id: i64, title: &str, done: bool) -> Result<(), Exception> {
        let (conn, statements) = self.handles()?;
        conn.exec_drop(&statements.update, (title, done, todo_id))
            .await
            .map_err(|e| Exception::DbError(e.to_string()))
    }

    /// 按 id 删除。不做存在性检查，删除不存在的 id 同样视为成功。
    pub async fn delete(&mut self, todo_id: i64) -> Result<(), Exception> {
        let (conn, statements) = self.handles()?;
        conn.exec_drop(&statements.delete, (todo_id,))
            .await
            .map_err(|e| Exception::DbError(e.to_string()))
    }

    /// 取出连接与语句句柄。语句句柄克隆开销极小（内部为引用计数）。
    ///
    /// 查询失败不会拆除连接：连接留待下一个请求经由 `ensure_connected` 惰性复核。
    fn handles(&mut self) -> Result<(&mut Conn, Statements), Exception> {
        let statements = self
            .statements
            .clone()
            .ok_or_else(|| Exception::ConnectionError("statements not prepared".to_string()))?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Exception::ConnectionError("not connected".to_string()))?;
        Ok((conn, statements))
    }

    /// 尝试单个候选端点：建连、探活、整体编译五条语句。任何一步失败都放弃该端点。
    async fn try_endpoint(
        &self,
        ip: &str,
        port: u16,
    ) -> Result<(Conn, Statements), mysql_async::Error> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(ip.to_string())
            .tcp_port(port)
            .user(Some(self.db_user.clone()))
            .pass(Some(self.db_password.clone()))
            .db_name(Some(self.db_name.clone()));
        let mut conn = Conn::new(opts).await?;
        conn.ping().await?;
        let statements = Self::prepare_all(&mut conn).await?;
        Ok((conn, statements))
    }

    /// 在给定连接上整体编译五条语句。
    async fn prepare_all(conn: &mut Conn) -> Result<Statements, mysql_async::Error> {
        Ok(Statements {
            list: conn.prep(SQL_LIST).await?,
            insert: conn.prep(SQL_INSERT).await?,
            update: conn.prep(SQL_UPDATE).await?,
            delete: conn.prep(SQL_DELETE).await?,
            last_id: conn.prep(SQL_LAST_ID).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 新建的会话处于断开状态，任何查询操作都报连接错误而不是 panic
    #[tokio::test]
    async fn test_disconnected_store_reports_connection_error() {
        let mut store = TodoStore::new("127.0.0.1", 3306, "root", "", "todo");

        assert!(matches!(
            store.list().await,
            Err(Exception::ConnectionError(_))
        ));
        assert!(matches!(
            store.probe().await,
            Err(Exception::ConnectionError(_))
        ));
        assert!(matches!(
            store.ensure_prepared(0).await,
            Err(Exception::ConnectionError(_))
        ));
    }

    /// 无法解析/连接的端点让 ensure_connected 以 ConnectionError 收场，会话保持断开
    #[tokio::test]
    async fn test_ensure_connected_failure_leaves_session_disconnected() {
        // 端口 9 (discard) 上不会有 MySQL 服务
        let mut store = TodoStore::new("127.0.0.1", 9, "root", "", "todo");

        let result = store.ensure_connected(0).await;
        assert!(matches!(result, Err(Exception::ConnectionError(_))));

        // 失败后不允许复用推定已死的句柄
        assert!(matches!(
            store.list().await,
            Err(Exception::ConnectionError(_))
        ));
    }
}
