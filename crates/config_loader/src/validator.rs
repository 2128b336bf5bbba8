//! 配置校验模块
//!
//! 校验规则：
//! - 数值范围 (validator derive)
//! - 0 < cache_ttl_minutes <= 一周，计时参数不超过一天
//! - backoff_base_ms <= backoff_cap_ms
//! - feed / channel 名称唯一且非空
//! - endpoint_path 以 '/' 开头
//! - 启用 live / channel 时 upstream 地址必填

use std::collections::HashSet;

use contracts::{StreamError, StreamingBlueprint, StreamingConfig, MAX_CACHE_TTL_MINUTES};
use validator::Validate;

/// 校验 StreamingBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &StreamingBlueprint) -> Result<(), StreamError> {
    validate_streaming(&blueprint.streaming)?;
    validate_feeds(blueprint)?;
    validate_channels(blueprint)?;
    validate_upstream(blueprint)?;
    Ok(())
}

/// 只校验运行参数（运行时 update_config 使用）
pub fn validate_streaming(streaming: &StreamingConfig) -> Result<(), StreamError> {
    validate_ranges(streaming)?;
    validate_timing(streaming)
}

/// 校验数值范围
fn validate_ranges(streaming: &StreamingConfig) -> Result<(), StreamError> {
    streaming.validate().map_err(|errors| {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| format!("streaming.{k}"))
            .unwrap_or_else(|| "streaming".to_string());
        StreamError::config_validation(field, errors.to_string())
    })
}

/// 校验时间相关配置
fn validate_timing(streaming: &StreamingConfig) -> Result<(), StreamError> {
    let ttl = streaming.cache_ttl_minutes;
    if !ttl.is_finite() || ttl <= 0.0 || ttl > MAX_CACHE_TTL_MINUTES {
        return Err(StreamError::config_validation(
            "streaming.cache_ttl_minutes",
            format!("cache_ttl_minutes must be in (0, {MAX_CACHE_TTL_MINUTES}], got {ttl}"),
        ));
    }

    if streaming.backoff_base_ms > streaming.backoff_cap_ms {
        return Err(StreamError::config_validation(
            "streaming.backoff_base_ms / streaming.backoff_cap_ms",
            format!(
                "backoff_base_ms ({}) must be <= backoff_cap_ms ({})",
                streaming.backoff_base_ms, streaming.backoff_cap_ms
            ),
        ));
    }

    Ok(())
}

/// 校验 feed 声明
fn validate_feeds(blueprint: &StreamingBlueprint) -> Result<(), StreamError> {
    let mut seen = HashSet::new();
    for (idx, feed) in blueprint.feeds.iter().enumerate() {
        if feed.name.trim().is_empty() {
            return Err(StreamError::config_validation(
                format!("feeds[{idx}].name"),
                "feed name cannot be empty",
            ));
        }
        if !seen.insert(feed.name.as_str()) {
            return Err(StreamError::config_validation(
                format!("feeds[name={}]", feed.name),
                "duplicate feed name",
            ));
        }
        if !feed.endpoint_path.starts_with('/') {
            return Err(StreamError::config_validation(
                format!("feeds[{}].endpoint_path", feed.name),
                format!(
                    "endpoint_path must start with '/', got '{}'",
                    feed.endpoint_path
                ),
            ));
        }
    }
    Ok(())
}

/// 校验 channel 声明
fn validate_channels(blueprint: &StreamingBlueprint) -> Result<(), StreamError> {
    let mut seen = HashSet::new();
    for (idx, channel) in blueprint.channels.iter().enumerate() {
        if channel.name.trim().is_empty() {
            return Err(StreamError::config_validation(
                format!("channels[{idx}].name"),
                "channel name cannot be empty",
            ));
        }
        if !seen.insert(channel.name.as_str()) {
            return Err(StreamError::config_validation(
                format!("channels[name={}]", channel.name),
                "duplicate channel name",
            ));
        }
    }
    Ok(())
}

/// 校验 upstream 地址
fn validate_upstream(blueprint: &StreamingBlueprint) -> Result<(), StreamError> {
    let streaming = &blueprint.streaming;
    let upstream = &blueprint.upstream;

    if streaming.enable_live_feed && !blueprint.feeds.is_empty() && upstream.feed_base_url.is_empty()
    {
        return Err(StreamError::config_validation(
            "upstream.feed_base_url",
            "feed_base_url is required when enable_live_feed = true",
        ));
    }

    if streaming.enable_channel && !blueprint.channels.is_empty() && upstream.channel_url.is_empty()
    {
        return Err(StreamError::config_validation(
            "upstream.channel_url",
            "channel_url is required when enable_channel = true",
        ));
    }

    Ok(())
}
