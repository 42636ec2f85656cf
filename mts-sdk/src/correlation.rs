//! 关联标识生成（CorrelationIdGenerator）
//!
//! 为每次外发提交产生进程内唯一的关联令牌。令牌仅要求同一性，
//! 不承诺签发顺序；前缀取自随机 UUID，计数器保证进程内不重复。
//!
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// 关联令牌生成器：随机前缀 + 原子计数
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    prefix: String,
    seq: AtomicU64,
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self {
            prefix: Uuid::new_v4().simple().to_string(),
            seq: AtomicU64::new(0),
        }
    }
}

impl CorrelationIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 签发下一枚令牌
    pub fn next_id(&self) -> String {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}", self.prefix, n)
    }
}
