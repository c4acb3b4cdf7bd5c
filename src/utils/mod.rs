//! 工具函数模块
//!
//! 提供时间戳转换、附件存储键生成等通用工具函数

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

/// 获取当前时间戳（毫秒）
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒数转换为 DateTime
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// 将毫秒时间戳格式化为 `HH:MM`（指定时区）
pub fn format_time_label(ms: i64, tz: &Tz) -> String {
    millis_to_datetime(ms)
        .map(|dt| dt.with_timezone(tz).format("%H:%M").to_string())
        .unwrap_or_default()
}

/// 清理原始文件名，只保留安全字符
///
/// 路径分隔符和控制字符会被替换为 `_`，空文件名退回 `file`
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// 生成附件存储键：`{prefix}/{提交毫秒}-{随机令牌}-{文件名}`
///
/// 提交时间与原始文件名保证可读性，随机令牌避免同一毫秒内的同名冲突
pub fn build_object_key(prefix: &str, submitted_at_ms: i64, file_name: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let prefix = prefix.trim_matches('/');
    let name = sanitize_file_name(file_name);
    if prefix.is_empty() {
        format!("{}-{}-{}", submitted_at_ms, &token[..8], name)
    } else {
        format!("{}/{}-{}-{}", prefix, submitted_at_ms, &token[..8], name)
    }
}
