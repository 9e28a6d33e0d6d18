// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 字段解码模块
//!
//! 该模块负责把 MySQL 协议层返回的列值（[`mysql_async::Value`]，一个带运行时类型标签的
//! 联合体）归一化为应用层需要的强类型值。不同驱动、不同列定义下同一逻辑字段可能以
//! 整数、无符号整数甚至文本的形式出现在线路上，这里统一抹平。
//!
//! ## 严格性的不对称约定
//! - 布尔与字符串转换**宽松**：无法识别的类型静默退化为 `false` / 空串，
//!   标志位与展示文本允许优雅降级。
//! - 整数转换**严格**：无法转换时返回 [`Exception::TypeError`]，
//!   标识符（id）绝不允许被静默破坏。
//!
//! 这是契约行为，不是疏漏。

use crate::exception::Exception;
use mysql_async::Value;

/// 将列值宽松地解码为布尔。
///
/// 整数类型非零即真；文本类型仅 `"1"` 与 `"true"` 为真；其余类型一律为假，不报错。
pub fn field_to_bool(value: &Value) -> bool {
    match value {
        Value::Int(v) => *v != 0,
        Value::UInt(v) => *v != 0,
        Value::Bytes(bytes) => bytes.as_slice() == b"1" || bytes.as_slice() == b"true",
        _ => false,
    }
}

/// 将列值严格地解码为 64 位有符号整数。
///
/// 整数类型直接转换；文本类型按十进制解析，解析失败报 `TypeError`；
/// 其余类型一律报 `TypeError`。
pub fn field_to_i64(value: &Value) -> Result<i64, Exception> {
    match value {
        Value::Int(v) => Ok(*v),
        Value::UInt(v) => Ok(*v as i64),
        Value::Bytes(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| Exception::TypeError("numeric field is not valid UTF-8"))?;
            text.parse::<i64>()
                .map_err(|_| Exception::TypeError("numeric field is not a decimal integer"))
        }
        _ => Err(Exception::TypeError(
            "field has incompatible type for numeric coercion",
        )),
    }
}

/// 将列值宽松地解码为字符串。
///
/// 文本类型原样透传；整数与浮点类型渲染为标准十进制文本；
/// NULL 以及其余类型一律退化为空串。
pub fn field_to_string(value: &Value) -> String {
    match value {
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::NULL => String::new(),
        _ => String::new(),
    }
}
