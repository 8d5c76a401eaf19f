use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::vision::ImageProductSearch;
use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
extern crate jsonpath_lib as jsonpath;
mod actions;
mod config;
mod dispatch;
mod server;
mod tracker;
mod vision;

/// 指定配置文件路径的环境变量，未设置时读取可执行文件所在目录下的 config.yaml
const CONFIG_ENV: &str = "IMAGERA_ACTIONS_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = config_path()?;
    //加载配置
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config file at {:?}", config_path))?;

    let dispatcher = Arc::new(Dispatcher::new(&config.backend, config.actions)?);

    let vision = match &config.vision {
        Some(v) => {
            if v.subscription_key.is_empty() {
                warn!("vision is configured without a subscription key");
            }
            let search =
                ImageProductSearch::new(&v.endpoint, &v.subscription_key, &v.market, v.timeout())?;
            Some(Arc::new(search))
        }
        None => None,
    };

    info!(
        port = config.port,
        backend = %config.backend.base_url,
        actions = ?dispatcher.action_names(),
        vision = vision.is_some(),
        "action server listening"
    );
    warp::serve(server::routes(dispatcher, vision))
        .run(([0, 0, 0, 0], config.port))
        .await;
    Ok(())
}

fn config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    // 获取可执行文件所在的目录路径
    let exe_path = env::current_exe().context("Failed to get current executable path")?;
    let exe_dir = exe_path
        .parent()
        .context("Failed to get parent directory of executable")?;
    Ok(exe_dir.join("config.yaml"))
}
