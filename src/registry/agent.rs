//! 服务注册代理
//!
//! [`ServiceAgent`] 跟踪一个逻辑服务名和一个后端连接：
//! 注册本进程的实例并用后台心跳维持存活，订阅其他服务的实例变化，
//! 以及向解析出的目标实例发起带重试的 HTTP 调用。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Backend, create_backend};
use crate::config::ClientConfig;
use crate::error::{BeaconError, Result};
use crate::registry::load_balancer::{LoadBalanceStrategy, ServiceSelector};
use crate::retry::{LinearBackoffPolicy, RetryPolicy};
use crate::types::{RegisterOpts, ServiceInstance};

/// 进程级全局代理
static GLOBAL_AGENT: OnceCell<Arc<ServiceAgent>> = OnceCell::const_new();

/// 服务注册代理
pub struct ServiceAgent {
    service_name: String,
    backend: Arc<dyn Backend>,
    selector: ServiceSelector,
    http: reqwest::Client,
    default_beat_interval: Duration,
    retry_step: Duration,
    // service_name -> 实例快照，由订阅任务维护
    instances: Arc<RwLock<HashMap<String, Vec<ServiceInstance>>>>,
    beating: Arc<AtomicBool>,
    registered: Mutex<Option<ServiceInstance>>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
    watch_handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ServiceAgent {
    /// 获取进程级全局代理
    ///
    /// 首次调用时建立后端连接；之后的调用返回已有实例，参数被忽略
    /// （每个进程只跟踪一个逻辑服务名）。
    pub async fn global(config: &ClientConfig, service_name: &str) -> Result<Arc<ServiceAgent>> {
        GLOBAL_AGENT
            .get_or_try_init(|| async {
                let agent = Self::connect(config, service_name).await?;
                Ok::<_, BeaconError>(Arc::new(agent))
            })
            .await
            .map(Arc::clone)
    }

    /// 连接注册中心并创建代理
    pub async fn connect(config: &ClientConfig, service_name: &str) -> Result<Self> {
        let backend = create_backend(config).await?;
        Self::new(backend, service_name, config)
    }

    /// 使用已有后端创建代理
    pub fn new(
        backend: Arc<dyn Backend>,
        service_name: &str,
        config: &ClientConfig,
    ) -> Result<Self> {
        use reqwest::header::{HeaderMap, HeaderValue, CONNECTION, CONTENT_TYPE};

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        headers.insert(
            "service",
            HeaderValue::from_str(service_name)
                .map_err(|_| BeaconError::settings(format!("invalid service name: {}", service_name)))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            service_name: service_name.to_string(),
            backend,
            selector: ServiceSelector::default(),
            http,
            default_beat_interval: Duration::from_millis(config.beat_interval_ms),
            retry_step: Duration::from_secs(2),
            instances: Arc::new(RwLock::new(HashMap::new())),
            beating: Arc::new(AtomicBool::new(false)),
            registered: Mutex::new(None),
            heartbeat_handle: Mutex::new(None),
            watch_handles: Mutex::new(HashMap::new()),
        })
    }

    /// 设置负载均衡策略
    pub fn with_strategy(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.selector = ServiceSelector::new(strategy);
        self
    }

    /// 设置重试退避步长（默认 2 秒）
    pub fn with_retry_step(mut self, step: Duration) -> Self {
        self.retry_step = step;
        self
    }

    /// 代理跟踪的服务名
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 注册本进程的实例并启动后台心跳
    pub async fn register(
        &self,
        ip: &str,
        port: u16,
        cluster: Option<&str>,
        opts: RegisterOpts,
    ) -> Result<ServiceInstance> {
        let mut instance = ServiceInstance::new(self.service_name.clone(), ip, port)
            .with_weight(opts.weight)
            .with_ephemeral(opts.ephemeral);
        instance.metadata = opts.metadata;
        if let Some(cluster) = cluster {
            instance = instance.with_cluster(cluster);
        }

        self.backend.register_instance(&instance).await?;

        {
            let mut registered = self.registered.lock().await;
            *registered = Some(instance.clone());
        }
        self.start_heartbeat(instance.clone()).await;

        Ok(instance)
    }

    /// 启动心跳循环
    ///
    /// 每轮先回落到默认间隔，心跳成功且服务端下发间隔时用下发值覆盖；
    /// 失败只记录日志，循环继续。`beating` 清零后退出。
    async fn start_heartbeat(&self, instance: ServiceInstance) {
        // 重复注册时替换旧的心跳任务
        {
            let mut handle = self.heartbeat_handle.lock().await;
            if let Some(old) = handle.take() {
                old.abort();
            }
        }
        self.beating.store(true, Ordering::SeqCst);

        let beating = self.beating.clone();
        let backend = self.backend.clone();
        let default_interval = self.default_beat_interval;

        let handle = tokio::spawn(async move {
            while beating.load(Ordering::SeqCst) {
                let mut interval = default_interval;
                match backend.heartbeat(&instance).await {
                    Ok(Some(server_interval)) => interval = server_interval,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            service = %instance.service_name,
                            instance_id = %instance.instance_id,
                            error = %e,
                            "Heartbeat failed, retrying after default interval"
                        );
                    }
                }
                tokio::time::sleep(interval).await;
            }
            info!(
                service = %instance.service_name,
                instance_id = %instance.instance_id,
                "🛑 Heartbeat loop stopped"
            );
        });

        let mut guard = self.heartbeat_handle.lock().await;
        *guard = Some(handle);
    }

    /// 停止心跳并注销本进程的实例
    pub async fn deregister(&self) -> Result<()> {
        self.beating.store(false, Ordering::SeqCst);
        {
            let mut handle = self.heartbeat_handle.lock().await;
            if let Some(handle) = handle.take() {
                handle.abort();
            }
        }

        let instance = {
            let mut registered = self.registered.lock().await;
            registered.take()
        };
        if let Some(instance) = instance {
            self.backend.deregister_instance(&instance).await?;
        }

        Ok(())
    }

    /// 订阅服务的实例变化
    ///
    /// 先拉一次全量实例作为初始缓存，再由后台任务消费 watch 推送；
    /// 每条通知记入日志并刷新本地缓存。重复订阅是幂等的。
    pub async fn subscribe(&self, service_name: &str) -> Result<()> {
        let mut handles = self.watch_handles.lock().await;
        if handles.contains_key(service_name) {
            return Ok(());
        }

        let initial = self.backend.list_instances(service_name).await?;
        {
            let mut cache = self.instances.write().await;
            cache.insert(service_name.to_string(), initial);
        }

        let mut rx = self.backend.watch_instances(service_name).await?;
        let cache = self.instances.clone();
        let service = service_name.to_string();

        let handle = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                info!(
                    service = %service,
                    count = snapshot.len(),
                    "🔔 Service instance set changed"
                );
                let mut guard = cache.write().await;
                guard.insert(service.clone(), snapshot);
            }
            debug!(service = %service, "Subscription task stopped");
        });

        handles.insert(service_name.to_string(), handle);
        Ok(())
    }

    /// 解析服务的一个可达地址（格式：`http://ip:port`）
    ///
    /// 从本地缓存读取实例集；未订阅过的服务补一次直查并写入缓存。
    /// 按配置的策略选取实例，默认取第一个健康实例，全部不健康时
    /// 退化为最后一个。
    pub async fn query(&self, service_name: &str) -> Result<String> {
        let cached = {
            let cache = self.instances.read().await;
            cache.get(service_name).cloned()
        };

        let list = match cached {
            Some(list) => list,
            None => {
                let list = self.backend.list_instances(service_name).await?;
                let mut cache = self.instances.write().await;
                cache.insert(service_name.to_string(), list.clone());
                list
            }
        };

        self.selector
            .select_url(&list)
            .ok_or_else(|| BeaconError::NoInstance(service_name.to_string()))
    }

    /// 调用远程服务
    ///
    /// 经由 [`query`](Self::query) 解析目标实例后发起一次 HTTP 调用；
    /// 解析或传输失败时重试，总尝试次数为 `try_times`，退避时长线性递增。
    /// 非 2xx 应答原样返回，由调用方处理。
    pub async fn request(
        &self,
        method: &str,
        service: &str,
        endpoint: &str,
        params: Option<&[(&str, &str)]>,
        body: Option<&serde_json::Value>,
        try_times: usize,
    ) -> Result<reqwest::Response> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| BeaconError::settings(format!("invalid http method: {}", method)))?;

        let policy = LinearBackoffPolicy::new(try_times.max(1), self.retry_step);
        let mut attempts = 0;
        let mut last_error: Option<BeaconError> = None;

        for attempt in 1..=policy.max_attempts() {
            attempts = attempt;
            match self
                .dispatch_once(method.clone(), service, endpoint, params, body)
                .await
            {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(
                        service,
                        endpoint,
                        attempt,
                        error = %e,
                        "Remote call attempt failed"
                    );
                    let retry = policy.should_retry(attempt, &e);
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                    tokio::time::sleep(policy.backoff_duration(attempt)).await;
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        Err(BeaconError::RequestFailed {
            service: service.to_string(),
            attempts,
            message,
        })
    }

    async fn dispatch_once(
        &self,
        method: reqwest::Method,
        service: &str,
        endpoint: &str,
        params: Option<&[(&str, &str)]>,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let base = self.query(service).await?;
        let url = format!("{}{}", base, endpoint);

        let mut builder = self.http.request(method, &url);
        if let Some(params) = params {
            builder = builder.query(params);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        debug!(url = %url, status = %resp.status(), "Remote call dispatched");
        Ok(resp)
    }
}

impl Drop for ServiceAgent {
    fn drop(&mut self) {
        self.beating.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.heartbeat_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        if let Ok(mut guard) = self.watch_handles.try_lock() {
            for (_, handle) in guard.drain() {
                handle.abort();
            }
        }
    }
}
