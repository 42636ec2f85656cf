//! SDK 配置（SdkConfig）
//!
//! 汇集拓扑派生所需的身份信息（根交换机、账户、节点、环境标签）
//! 与引擎运行参数（响应超时、清扫周期、发布队列限制等）。
//! 所有字段在构建后不可变；拓扑与引擎均以只读方式共享。
//!
use crate::error::{SdkError, SdkResult};
use bon::Builder;
use std::time::Duration;

/// SDK 配置：身份信息 + 引擎运行参数
#[derive(Builder, Debug, Clone)]
pub struct SdkConfig {
    /// 代理侧根交换机名，所有交换机名均由其派生
    #[builder(into)]
    pub root_exchange_name: String,
    /// 账户名（亦用作队列/路由键前缀）
    #[builder(into)]
    pub account: String,
    /// 节点编号（>= 1），区分同一账户下的多个接入进程
    pub node_id: u32,
    /// 环境标签（如 "prod"/"integration"），仅用于诊断字符串
    #[builder(into, default = "integration".to_string())]
    pub environment: String,

    /// 单个提交等待响应的超时（清扫任务据此判定过期）
    #[builder(default = Duration::from_secs(15))]
    pub response_timeout: Duration,
    /// 清扫任务的检查周期，与单条超时相互独立
    #[builder(default = Duration::from_millis(500))]
    pub sweep_interval: Duration,
    /// 阻塞调用在单条超时之外额外等待的余量，
    /// 保证本地等待不会抢在清扫判定之前先行超时
    #[builder(default = Duration::from_secs(1))]
    pub blocking_wait_grace: Duration,
    /// 本地发布队列长度上限（0 表示不限制）
    #[builder(default = 0)]
    pub publish_queue_limit: usize,
    /// 发布入队的最长等待，超出即判定发送失败
    #[builder(default = Duration::from_secs(15))]
    pub publish_queue_timeout: Duration,
    /// 同一事件广播给多个监听器时的处理并发
    #[builder(default = 8)]
    pub listener_concurrency: usize,
}

impl SdkConfig {
    /// 构建后校验；引擎与拓扑在组装时各自调用
    pub fn validate(&self) -> SdkResult<()> {
        if self.root_exchange_name.trim().is_empty() {
            return Err(SdkError::InvalidConfig {
                reason: "root_exchange_name must not be empty".to_string(),
            });
        }
        if self.account.trim().is_empty() {
            return Err(SdkError::InvalidConfig {
                reason: "account must not be empty".to_string(),
            });
        }
        if self.node_id < 1 {
            return Err(SdkError::InvalidConfig {
                reason: "node_id must be >= 1".to_string(),
            });
        }
        if self.response_timeout.is_zero() {
            return Err(SdkError::InvalidConfig {
                reason: "response_timeout must be > 0".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(SdkError::InvalidConfig {
                reason: "sweep_interval must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// 阻塞调用允许的最大等待 = 单条超时 + 余量
    pub fn max_blocking_wait(&self) -> Duration {
        self.response_timeout + self.blocking_wait_grace
    }
}
