//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 读取当前环境名称
//! - 加载环境特定配置并合并到基础配置

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;

use super::{overlay, read_table};

/// 环境变量：当前环境名称
pub const ENV_VAR: &str = "DUO_CHAT_ENV";

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 DUO_CHAT_ENV 获取，未设置时默认为 "development"
    pub fn get_environment() -> String {
        env::var(ENV_VAR).unwrap_or_else(|_| "development".to_string())
    }

    /// 按指定环境名合并配置
    ///
    /// 加载 `{root}/environments/{env}.toml` 并合并到基础配置中，
    /// 文件不存在时保持基础配置不变
    pub fn apply_environment(base: &mut Value, root: &Path, env: &str) -> Result<()> {
        let env_config_path = root.join("environments").join(format!("{env}.toml"));

        if !env_config_path.exists() {
            return Ok(());
        }

        let env_config = read_table(&env_config_path)
            .with_context(|| format!("environment `{env}` could not be applied"))?;
        overlay(base, env_config);
        Ok(())
    }
}
