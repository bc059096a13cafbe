//! Environment-driven defaults.
//!
//! 由环境变量驱动的默认配置。

use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable holding the background purge period, in milliseconds.
/// 保存后台清理周期（毫秒）的环境变量。
pub const PURGE_PERIOD_ENV: &str = "RCU_PURGE_PERIOD";

/// Purge period used when `RCU_PURGE_PERIOD` is unset or malformed.
/// 当 `RCU_PURGE_PERIOD` 未设置或格式错误时使用的清理周期。
pub const DEFAULT_PURGE_PERIOD: Duration = Duration::from_millis(1000);

/// How long `synchronize()` sleeps between two registry scans by default.
/// `synchronize()` 默认在两次注册表扫描之间休眠的时长。
pub const DEFAULT_SYNCHRONIZE_POLL: Duration = Duration::from_millis(250);

/// The purge period configured for this process.
///
/// The environment is read the first time this is called and cached afterwards.
///
/// 本进程配置的清理周期。首次调用时读取环境变量，之后缓存。
pub fn purge_period_from_env() -> Duration {
    static PERIOD: OnceLock<Duration> = OnceLock::new();

    *PERIOD.get_or_init(|| parse_purge_period(std::env::var(PURGE_PERIOD_ENV).ok().as_deref()))
}

/// Interpret a raw `RCU_PURGE_PERIOD` value.
pub fn parse_purge_period(raw: Option<&str>) -> Duration {
    let Some(raw) = raw else {
        return DEFAULT_PURGE_PERIOD;
    };

    match raw.trim().parse::<u64>() {
        Ok(millis) if millis > 0 => Duration::from_millis(millis),
        _ => {
            log::warn!(
                "ignoring {}={:?}: expected a positive number of milliseconds, using {:?}",
                PURGE_PERIOD_ENV,
                raw,
                DEFAULT_PURGE_PERIOD
            );
            DEFAULT_PURGE_PERIOD
        }
    }
}
