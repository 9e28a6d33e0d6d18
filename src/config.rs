use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use core::str;
use log::error;
use std::fs::File;
use std::io::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_worker_threads")]
    worker_threads: usize,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default = "default_db_host")]
    db_host: String,
    #[serde(default = "default_db_port")]
    db_port: u16,
    #[serde(default = "default_db_name")]
    db_name: String,
    #[serde(default = "default_db_user")]
    db_user: String,
    #[serde(default = "default_db_password")]
    db_password: String,
    #[serde(default = "default_cors_origin")]
    cors_origin: String,
}

fn default_port() -> u16 {
    8080
}

fn default_worker_threads() -> usize {
    0 // 0 表示使用全部 CPU 核心
}

fn default_local() -> bool {
    true
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_name() -> String {
    "todo".to_string()
}

fn default_db_user() -> String {
    "root".to_string()
}

fn default_db_password() -> String {
    String::new()
}

fn default_cors_origin() -> String {
    "*".to_string()
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: default_port(),
            worker_threads: num_cpus::get(),
            local: default_local(),
            db_host: default_db_host(),
            db_port: default_db_port(),
            db_name: default_db_name(),
            db_user: default_db_user(),
            db_password: default_db_password(),
            cors_origin: default_cors_origin(),
        }
    }

    pub fn from_toml(filename: &str) -> Self {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => panic!("no such file {} exception:{}", filename, e),
        };
        let mut str_val = String::new();
        match file.read_to_string(&mut str_val) {
            Ok(s) => s,
            Err(e) => panic!("Error Reading file: {}", e),
        };

        let mut raw_config: Config = match toml::from_str(&str_val) {
            Ok(t) => t,
            Err(_) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置");
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        raw_config
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn db_host(&self) -> &str {
        &self.db_host
    }

    pub fn db_port(&self) -> u16 {
        self.db_port
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn db_user(&self) -> &str {
        &self.db_user
    }

    pub fn db_password(&self) -> &str {
        &self.db_password
    }

    pub fn cors_origin(&self) -> &str {
        &self.cors_origin
    }
}
