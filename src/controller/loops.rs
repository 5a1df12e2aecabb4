//! 后台周期任务
//!
//! 每个周期体返回 `ShieldResult`，失败只在任务边界记录一次日志，下个周期照常执行。

use super::ControllerCore;
use crate::error::ShieldResult;
use rat_logger::{debug, error, info};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

pub(crate) fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    core: Arc<ControllerCore>,
    body: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<ControllerCore>) -> Fut + Send + 'static,
    Fut: Future<Output = ShieldResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 首次 tick 立即返回
        ticker.tick().await;
        info!("启动后台任务: {}，周期 {}秒", name, period.as_secs());

        loop {
            ticker.tick().await;
            debug!("执行后台任务: {}", name);
            if let Err(e) = body(core.clone()).await {
                error!("后台任务 {} 本轮失败: {}", name, e);
            }
        }
    })
}

impl ControllerCore {
    /// 采样、泄漏回收与过期缓存清理
    pub(crate) async fn monitor_tick(self: Arc<Self>) -> ShieldResult<()> {
        let sample = self.facade.pool().collect_metrics();
        let expired = self.facade.cache().sweep();
        debug!(
            "监控采样: 利用率={:.1}%, CPU={:.1}%, 内存={:.1}%, 清理过期缓存={}",
            sample.utilization, sample.cpu_percent, sample.memory_percent, expired
        );
        Ok(())
    }

    pub(crate) async fn optimizer_tick(self: Arc<Self>) -> ShieldResult<()> {
        if !self.mode().profile().background_work {
            debug!("当前模式 {} 暂停优化任务", self.mode());
            return Ok(());
        }
        self.run_optimization(false);
        Ok(())
    }

    /// 委托连接池扩缩容，并按预测负载调整调度器并发上限
    pub(crate) async fn autoscale_tick(self: Arc<Self>) -> ShieldResult<()> {
        if !self.mode().profile().background_work {
            debug!("当前模式 {} 暂停自动扩缩容", self.mode());
            return Ok(());
        }

        let decision = self.facade.pool().auto_scale().await;
        *self.last_scaling.lock() = Some(decision);

        let predicted = self.facade.pool().predictor().predict_next_load();
        let current = self.scheduler.concurrency();
        if predicted > 80.0 {
            self.scheduler.scale_concurrency(current + (current / 4).max(1));
        } else if predicted < 30.0 {
            self.scheduler.scale_concurrency(current - current / 4);
        }
        Ok(())
    }

    /// 计算健康分，必要时进入紧急模式
    pub(crate) async fn health_tick(self: Arc<Self>) -> ShieldResult<()> {
        self.check_health().await.map(|_| ())
    }
}
