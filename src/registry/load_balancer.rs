//! 负载均衡模块
//!
//! 提供多种负载均衡策略，用于从多个服务实例中选择一个

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::types::ServiceInstance;

/// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalanceStrategy {
    /// 取第一个健康实例；全部不健康时退化为最后一个实例
    FirstHealthy,
    /// 在健康实例间轮询（Round Robin）
    RoundRobin,
    /// 在健康实例间随机（Random）
    Random,
}

impl Default for LoadBalanceStrategy {
    fn default() -> Self {
        LoadBalanceStrategy::FirstHealthy
    }
}

/// 服务选择器
///
/// 封装选择策略，从实例列表中挑出一个目标实例。
pub struct ServiceSelector {
    strategy: LoadBalanceStrategy,
    round_robin_index: AtomicUsize,
}

impl ServiceSelector {
    /// 创建新的服务选择器
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    /// 选择服务实例
    ///
    /// 全部实例不健康时退化为最后一个实例（保持可用性优先），
    /// 空列表返回 `None`。
    pub fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }

        let healthy: Vec<&ServiceInstance> = instances.iter().filter(|i| i.healthy).collect();
        if healthy.is_empty() {
            let last = instances.last();
            if let Some(instance) = last {
                debug!(
                    service = %instance.service_name,
                    instance_id = %instance.instance_id,
                    "No healthy instance, degrading to last seen"
                );
            }
            return last;
        }

        match self.strategy {
            LoadBalanceStrategy::FirstHealthy => healthy.first().copied(),
            LoadBalanceStrategy::RoundRobin => {
                let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed);
                healthy.get(index % healthy.len()).copied()
            }
            LoadBalanceStrategy::Random => {
                use rand::Rng;
                let index = rand::thread_rng().gen_range(0..healthy.len());
                healthy.get(index).copied()
            }
        }
    }

    /// 选择服务地址（格式：`http://ip:port`）
    pub fn select_url(&self, instances: &[ServiceInstance]) -> Option<String> {
        self.select(instances).map(ServiceInstance::to_http_url)
    }
}

impl Default for ServiceSelector {
    fn default() -> Self {
        Self::new(LoadBalanceStrategy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances() -> Vec<ServiceInstance> {
        vec![
            ServiceInstance::new("svc", "10.0.0.1", 8080)
                .with_instance_id("a")
                .with_healthy(false),
            ServiceInstance::new("svc", "10.0.0.2", 8080).with_instance_id("b"),
            ServiceInstance::new("svc", "10.0.0.3", 8080).with_instance_id("c"),
        ]
    }

    #[test]
    fn test_first_healthy_skips_unhealthy() {
        let selector = ServiceSelector::default();
        let list = instances();
        assert_eq!(selector.select(&list).unwrap().instance_id, "b");
        assert_eq!(selector.select_url(&list).as_deref(), Some("http://10.0.0.2:8080"));
    }

    #[test]
    fn test_degrades_to_last_seen_when_all_unhealthy() {
        let selector = ServiceSelector::default();
        let list: Vec<ServiceInstance> = instances()
            .into_iter()
            .map(|i| i.with_healthy(false))
            .collect();
        assert_eq!(selector.select(&list).unwrap().instance_id, "c");
    }

    #[test]
    fn test_empty_list_returns_none() {
        let selector = ServiceSelector::default();
        assert!(selector.select(&[]).is_none());
    }

    #[test]
    fn test_round_robin_cycles_healthy() {
        let selector = ServiceSelector::new(LoadBalanceStrategy::RoundRobin);
        let list = instances();
        let picks: Vec<String> = (0..4)
            .map(|_| selector.select(&list).unwrap().instance_id.clone())
            .collect();
        assert_eq!(picks, vec!["b", "c", "b", "c"]);
    }

    #[test]
    fn test_random_picks_healthy_member() {
        let selector = ServiceSelector::new(LoadBalanceStrategy::Random);
        let list = instances();
        for _ in 0..16 {
            let picked = selector.select(&list).unwrap();
            assert!(picked.healthy);
        }
    }
}
