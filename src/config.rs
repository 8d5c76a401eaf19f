use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::actions::retail_actions;

/// 配置文件未填写识图密钥时读取的环境变量
pub const VISION_KEY_ENV: &str = "VISUAL_SEARCH_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not correct format config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    pub backend: BackendConfig,

    #[serde(default)]
    pub vision: Option<VisionConfig>,

    #[serde(default = "retail_actions")]
    pub actions: Vec<ActionConfig>,
}

fn default_port() -> u16 {
    5055
}

/// 内部商品/订单 REST 服务
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    /// 不设置则不限制请求时长
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl BackendConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// 外部识图接口
#[derive(Debug, Deserialize)]
pub struct VisionConfig {
    pub endpoint: String,
    #[serde(default)]
    pub subscription_key: String,
    #[serde(default = "default_market")]
    pub market: String,
    #[serde(default = "default_vision_timeout")]
    pub timeout_secs: u64,
}

fn default_market() -> String {
    "en-US".to_string()
}

fn default_vision_timeout() -> u64 {
    8
}

impl VisionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 动作表中的一行
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    pub name: String,
    /// 相对于 backend.base_url 的路径模板，占位符为 `{实体名}`
    pub endpoint: String,
    #[serde(default)]
    pub required_entities: Vec<String>,
    /// 缺少必需实体时的提示，未设置则使用 fallback
    #[serde(default)]
    pub prompt: Option<String>,
    pub fallback: String,
    /// 以 $ 开头的 json path，从返回结果中截取回复内容
    #[serde(default)]
    pub select: Option<String>,
}

impl ActionConfig {
    pub fn prompt_text(&self) -> &str {
        self.prompt.as_deref().unwrap_or(&self.fallback)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml(&raw)?;
        if let Some(vision) = config.vision.as_mut() {
            if vision.subscription_key.is_empty() {
                vision.subscription_key = std::env::var(VISION_KEY_ENV).unwrap_or_default();
            }
        }
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config = serde_yaml::from_str::<Config>(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.backend.base_url).map_err(|e| {
            ConfigError::Invalid(format!("backend.base_url {:?}: {}", self.backend.base_url, e))
        })?;

        let mut names = HashSet::new();
        for action in &self.actions {
            if !names.insert(action.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate action {}",
                    action.name
                )));
            }
            validate_action(action)?;
        }
        Ok(())
    }
}

fn validate_action(action: &ActionConfig) -> Result<(), ConfigError> {
    if action.required_entities.iter().any(|e| e.is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "{}: empty entity name",
            action.name
        )));
    }

    // 用占位值试渲染一次，模板里出现未声明的实体时报错
    let sample: HashMap<String, String> = action
        .required_entities
        .iter()
        .map(|e| (e.clone(), "x".to_string()))
        .collect();
    strfmt::strfmt(&action.endpoint, &sample).map_err(|e| {
        ConfigError::Invalid(format!("{}: endpoint {:?}: {}", action.name, action.endpoint, e))
    })?;

    // 声明了却没有用到的实体只会让用户白白补充
    if let Some(unused) = action
        .required_entities
        .iter()
        .find(|e| !action.endpoint.contains(&format!("{{{}}}", e)))
    {
        return Err(ConfigError::Invalid(format!(
            "{}: entity {} is not used by endpoint {:?}",
            action.name, unused, action.endpoint
        )));
    }

    if let Some(path) = &action.select {
        jsonpath::select(&serde_json::Value::Null, path).map_err(|e| {
            ConfigError::Invalid(format!("{}: select {:?}: {:?}", action.name, path, e))
        })?;
    }
    Ok(())
}
