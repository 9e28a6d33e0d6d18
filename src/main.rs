// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 异步 Todo API 服务器
//!
//! 该模块实现了基于 Tokio 运行时的多任务 CRUD API 服务器。
//! 核心功能包括：
//! - 每连接一个任务的会话循环（Keep-Alive + 空闲超时）
//! - 惰性重连、惰性重编译的单连接数据库会话管理
//! - 把异构线路层列值归一化为强类型值的字段解码层
//! - 带 CORS 头的 JSON / 纯文本响应构建
//! - 后台管理控制台（CLI 指令交互）

// --- 模块定义 ---
mod config; // 配置解析与管理
mod db; // 数据库会话管理
mod exception; // 自定义异常与错误处理
mod field; // 列值解码
mod param; // 全局常量与静态参数
mod request; // HTTP 请求报文解析器
mod response; // HTTP 响应报文构建器
mod router; // 路由分发

use config::Config;
use db::TodoStore;
use request::Request;
use response::Response;

use log::{debug, error, info};
use log4rs;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    runtime::Builder,
    sync::Mutex as AsyncMutex,
    time::{timeout, Duration},
};

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::{Arc, Mutex},
    time::Instant,
};

use crate::param::IDLE_TIMEOUT_SECS;

/// # 程序入口点
///
/// 初始化日志与配置，按配置构建多线程运行时，并在其上驱动主事件循环。
fn main() {
    // 1. 初始化日志系统：采用 log4rs 异步日志架构，通过外部 YAML 灵活配置级别与输出目的地
    log4rs::init_file("config/log4rs.yaml", Default::default()).unwrap();

    // 2. 环境配置加载：从 TOML 文件读取运行参数
    let config = Config::from_toml("config/development.toml");
    info!("配置文件已载入");

    // 3. 异步运行时定制：根据配置文件动态分配工作线程数，实现 CPU 绑定的并发优化
    let worker_threads = config.worker_threads();
    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(serve(config));
}

/// 监听器初始化与主事件循环（Accept Loop）。
async fn serve(config: Config) {
    // 共享资源初始化：
    // - 数据库会话是全进程唯一的共享可变资源，用单个异步互斥锁独占访问，
    //   全部数据库操作（探活、重连、编译、查询）对所有并发连接严格串行
    let store = Arc::new(AsyncMutex::new(TodoStore::new(
        config.db_host(),
        config.db_port(),
        config.db_user(),
        config.db_password(),
        config.db_name(),
    )));
    let config_arc = Arc::new(config.clone());

    // 网络层初始化：
    // 支持全地址监听 (0.0.0.0) 或本地回环监听 (127.0.0.1)
    let port: u16 = config.port();
    info!("服务端将在{}端口上监听Socket连接", port);
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}地址上监听Socket连接", address);
    let socket = SocketAddrV4::new(address, port);

    // 绑定端口并启动监听器
    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            panic!("无法绑定端口：{}，错误：{}", port, e);
        }
    };
    info!("端口{}绑定完成", port);

    // 服务器状态与生命周期管理
    // shutdown_flag: 用于优雅停机 (Graceful Shutdown)
    // active_connection: 追踪当前并发连接数
    let shutdown_flag = Arc::new(Mutex::new(false));
    let active_connection = Arc::new(Mutex::new(0u32));

    // 启动交互式管理控制台任务
    // 该任务运行在后台，不阻塞监听循环，提供运维指令支持
    tokio::spawn({
        let shutdown_flag = Arc::clone(&shutdown_flag);
        let active_connection = Arc::clone(&active_connection);
        async move {
            let stdin = tokio::io::stdin();
            let mut reader = BufReader::new(stdin);
            let mut input = String::new();
            loop {
                input.clear();
                if let Ok(_) = reader.read_line(&mut input).await {
                    let cmd = input.trim();
                    match cmd {
                        "stop" => {
                            let mut flag = shutdown_flag.lock().unwrap();
                            *flag = true;
                            println!("停机指令已激活，服务器将在处理完下一个连接后关闭...");
                            break;
                        }
                        "help" => {
                            println!("== Todoserver Help ==");
                            println!("stop   - 发出停机信号");
                            println!("status - 查看当前服务器运行状态");
                            println!("help   - 显示此帮助信息");
                            println!("=====================");
                        }
                        "status" => {
                            let active_count = *active_connection.lock().unwrap();
                            println!("== Todoserver 状态 ==");
                            println!("当前活跃连接数: {}", active_count);
                            println!("=====================");
                        }
                        _ => {
                            println!("无效的命令：{}", cmd);
                        }
                    }
                } else {
                    break;
                }
            }
        }
    });

    let mut id: u128 = 0;

    // 主事件循环 (Accept Loop)
    // 持续接收新连接并将其分发至 Tokio 任务进行异步处理。
    // 每个连接总是得到一个新任务，不设准入上限。
    loop {
        // 检查停机标志位
        if *shutdown_flag.lock().unwrap() {
            info!("主循环接收到停机指令，正在退出...");
            break;
        }

        // 等待新的 TCP 连接
        let (mut stream, addr) = listener.accept().await.unwrap();
        debug!("新的连接：{}", addr);

        // 为每个连接克隆资源句柄（Arc 引用计数增加）
        let active_connection_arc = Arc::clone(&active_connection);
        let store_arc = Arc::clone(&store);
        let config_arc_clone = Arc::clone(&config_arc);

        debug!("[ID{}]TCP连接已建立", id);

        // 使用轻量级绿色线程处理具体请求，确保非阻塞 IO
        tokio::spawn(async move {
            {
                // 连接计数加 1
                let mut lock = active_connection_arc.lock().unwrap();
                *lock += 1;
            }

            // 核心业务处理
            handle_connection(&mut stream, id, store_arc, config_arc_clone).await;

            {
                // 处理完成后连接计数减 1
                let mut lock = active_connection_arc.lock().unwrap();
                *lock -= 1;
            }
        });
        id += 1; // 增加连接唯一标识序列
    }
}

/// # 连接处理器（会话循环）
///
/// 负责单个 TCP 流的生命周期：循环地读取一个完整请求、分发路由、写回响应，
/// 直到对端关闭、读取出错、空闲超时或本次交换不再保持连接为止。
/// 循环退出后半关闭连接的写方向。
async fn handle_connection(
    stream: &mut TcpStream,
    id: u128,
    store: Arc<AsyncMutex<TodoStore>>,
    config: Arc<Config>,
) {
    // 跨请求的接收缓冲：流水线客户端提前送达的下一个请求留在这里等待下一轮
    let mut pending: Vec<u8> = Vec::with_capacity(1024);
    loop {
        // 1. 报文读取阶段：在 30 秒空闲超时内读取一个完整 HTTP 请求
        let buffer = match read_request(stream, id, &mut pending).await {
            Ok(Some(buffer)) => buffer,
            Ok(None) => break, // 对端正常关闭或空闲超时
            Err(_) => break,   // 其它读取错误同样终结会话
        };
        debug!("[ID{}]HTTP请求接收完毕", id);

        let start_time = Instant::now();

        // 2. 协议解析阶段：将字节流转换为结构化的 Request 对象
        let response = match Request::try_from(&buffer, id) {
            Ok(request) => {
                debug!("[ID{}]成功解析HTTP请求", id);

                // 3. 路由分发阶段：数据库异常在路由层内被转换为响应，不会穿透到这里
                let response =
                    router::handle_request(&request, &store, config.cors_origin(), id).await;
                debug!(
                    "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
                    id,
                    start_time.elapsed().as_millis()
                );

                // 4. 结构化日志记录：便于后期审计与性能监控
                info!(
                    "[ID{}] {}, {}, {}, {}, {}, {}, ",
                    id,
                    request.version(),
                    request.path(),
                    request.method(),
                    response.status_code(),
                    response.information(),
                    request.user_agent(),
                );
                response
            }
            Err(e) => {
                error!("[ID{}]解析HTTP请求失败: {:?}", id, e);
                Response::bad_request(config.cors_origin())
            }
        };

        // 5. 数据发送阶段
        let keep_alive = response.keep_alive();
        if let Err(e) = stream.write_all(&response.as_bytes()).await {
            error!("[ID{}]发送响应失败: {}", id, e);
            break;
        }
        let _ = stream.flush().await;

        // 6. 长连接判定：本次交换不保持连接则终结会话
        if !keep_alive {
            break;
        }
    }

    // 半关闭连接的写方向
    let _ = stream.shutdown().await;
    debug!("[ID{}]会话结束", id);
}

/// 从 TCP 流中读取一个完整的 HTTP 请求（首部 + 按 `Content-Length` 计算的请求体）。
///
/// `pending` 是会话级的接收缓冲：流水线客户端随第一个请求一并送达的后续字节
/// 会留在其中，下一次调用从缓冲头部继续消费，不会被丢弃。
///
/// 每次底层读取都被 30 秒空闲超时约束。返回值约定：
/// - `Ok(Some(buffer))` —— 读到一个完整请求；
/// - `Ok(None)` —— 对端在请求边界处正常关闭，或空闲超时，会话应安静退出；
/// - `Err(())` —— 其它读取错误，会话应退出。
async fn read_request(
    stream: &mut TcpStream,
    id: u128,
    pending: &mut Vec<u8>,
) -> Result<Option<Vec<u8>>, ()> {
    let mut chunk = [0u8; 1024];

    loop {
        // 缓冲中已有完整请求则立即取出，剩余字节留待下一个请求
        if let Some(total) = expected_request_len(pending) {
            if pending.len() >= total {
                let buffer: Vec<u8> = pending.drain(..total).collect();
                return Ok(Some(buffer));
            }
        }

        let read = match timeout(
            Duration::from_secs(IDLE_TIMEOUT_SECS),
            stream.read(&mut chunk),
        )
        .await
        {
            Ok(Ok(0)) => {
                if pending.is_empty() {
                    debug!("[ID{}]对端关闭连接", id);
                    return Ok(None);
                }
                error!("[ID{}]对端在请求中途关闭连接", id);
                return Err(());
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
                return Err(());
            }
            Err(_) => {
                debug!("[ID{}]空闲超时（{}秒），关闭会话", id, IDLE_TIMEOUT_SECS);
                return Ok(None);
            }
        };
        pending.extend_from_slice(&chunk[..read]);
    }
}

/// 计算缓冲区中一个完整请求应占的总字节数。
///
/// 首部终止符（`\r\n\r\n`）尚未出现时返回 `None`；
/// 出现后返回 `首部长度 + Content-Length`（无该头时请求体长度记 0）。
fn expected_request_len(buffer: &[u8]) -> Option<usize> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = String::from_utf8_lossy(&buffer[..header_end]);
    let mut content_length = 0;
    for line in head.split("\r\n") {
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(val) = line.split(':').nth(1) {
                content_length = val.trim().parse::<usize>().unwrap_or(0);
            }
        }
    }
    Some(header_end + content_length)
}
