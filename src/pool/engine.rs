//! 单个后端连接池（引擎）
//!
//! `pool_size` 个常驻连接 + 最多 `max_overflow` 个溢出连接，容量由信号量控制。
//! 总容量固定为创建时的 `pool_size + max_overflow`，调整常驻连接数只改变两者的划分。
//! 借出得到 [`PooledConnection`] 守卫，守卫释放即归还；溢出连接归还后直接关闭。

use super::driver::{DatabaseDriver, DriverConnection};
use super::leak_detector::{ConnectionHandle, LeakDetector};
use crate::error::ShieldResult;
use crate::types::QueryOutcome;
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use rat_logger::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout_at};

/// 借出记录
#[derive(Debug, Clone, Copy)]
struct CheckoutInfo {
    checked_out_at: Instant,
}

/// 引擎状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub engine_id: u32,
    pub size: u32,
    pub max_overflow: u32,
    pub checked_out: u32,
    pub overflow: u32,
    pub idle: u32,
    pub open: u32,
    /// 利用率百分比
    pub utilization: f64,
    pub total_checkouts: u64,
    /// 最久借出时长（秒）
    pub longest_checkout_secs: f64,
}

/// 单个后端连接池
pub struct EnginePool {
    id: u32,
    driver: Arc<dyn DatabaseDriver>,
    leak_detector: Arc<LeakDetector>,
    pool_size: AtomicU32,
    /// 常驻 + 溢出的总名额
    capacity: u32,
    slots: Semaphore,
    idle: SegQueue<Box<dyn DriverConnection>>,
    idle_count: AtomicU32,
    open: AtomicU32,
    checked_out: DashMap<u64, CheckoutInfo>,
    next_connection_id: AtomicU64,
    total_checkouts: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for EnginePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnginePool")
            .field("id", &self.id)
            .field("driver", &self.driver.name())
            .field("pool_size", &self.pool_size.load(Ordering::Relaxed))
            .field("capacity", &self.capacity)
            .field("checked_out", &self.checked_out.len())
            .finish()
    }
}

impl EnginePool {
    /// 创建引擎并预热一条连接，预热失败则创建失败
    pub async fn create(
        id: u32,
        driver: Arc<dyn DatabaseDriver>,
        leak_detector: Arc<LeakDetector>,
        pool_size: u32,
        max_overflow: u32,
    ) -> ShieldResult<Arc<Self>> {
        let pool_size = pool_size.max(1);
        let capacity = pool_size + max_overflow;
        let engine = Arc::new(Self {
            id,
            driver,
            leak_detector,
            pool_size: AtomicU32::new(pool_size),
            capacity,
            slots: Semaphore::new(capacity as usize),
            idle: SegQueue::new(),
            idle_count: AtomicU32::new(0),
            open: AtomicU32::new(0),
            checked_out: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            total_checkouts: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        engine.warm().await?;
        info!(
            "引擎 {} 已创建: 常驻连接={}, 溢出上限={}, 驱动={}",
            id,
            pool_size,
            max_overflow,
            engine.driver.name()
        );
        Ok(engine)
    }

    async fn warm(&self) -> ShieldResult<()> {
        let mut conn = self.driver.connect().await?;
        conn.ping().await?;
        self.open.fetch_add(1, Ordering::SeqCst);
        self.push_idle(conn);
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size.load(Ordering::SeqCst)
    }

    /// 溢出上限 = 总容量 - 常驻连接数
    pub fn max_overflow(&self) -> u32 {
        self.capacity.saturating_sub(self.pool_size())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn checked_out(&self) -> u32 {
        self.checked_out.len() as u32
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 当前溢出连接数
    pub fn overflow(&self) -> u32 {
        self.open.load(Ordering::SeqCst).saturating_sub(self.pool_size())
    }

    /// 利用率百分比：checked_out / (size + overflow)，总是按当前状态计算
    pub fn utilization(&self) -> f64 {
        let capacity = self.pool_size() + self.overflow();
        if capacity == 0 {
            return 0.0;
        }
        (self.checked_out() as f64 / capacity as f64 * 100.0).min(100.0)
    }

    fn push_idle(&self, conn: Box<dyn DriverConnection>) {
        self.idle.push(conn);
        self.idle_count.fetch_add(1, Ordering::SeqCst);
    }

    fn pop_idle(&self) -> Option<Box<dyn DriverConnection>> {
        let conn = self.idle.pop()?;
        self.idle_count.fetch_sub(1, Ordering::SeqCst);
        Some(conn)
    }

    /// 借出连接，截止时间前无法取得名额时返回 `AcquisitionTimeout`
    pub async fn checkout(self: &Arc<Self>, deadline: Instant) -> ShieldResult<PooledConnection> {
        let timeout_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;

        let permit = timeout_at(deadline, self.slots.acquire())
            .await
            .map_err(|_| crate::shield_error!(acquisition_timeout, timeout_ms))?
            .map_err(|_| crate::shield_error!(connection, format!("引擎 {} 已关闭", self.id)))?;
        permit.forget();

        let conn = match self.pop_idle() {
            Some(conn) => conn,
            None => match timeout_at(deadline, self.driver.connect()).await {
                Ok(Ok(conn)) => {
                    self.open.fetch_add(1, Ordering::SeqCst);
                    debug!("引擎 {} 新建连接，当前打开连接数={}", self.id, self.open.load(Ordering::SeqCst));
                    conn
                }
                Ok(Err(e)) => {
                    self.release_slot();
                    return Err(e);
                }
                Err(_) => {
                    self.release_slot();
                    return Err(crate::shield_error!(acquisition_timeout, timeout_ms));
                }
            },
        };

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        self.checked_out.insert(
            connection_id,
            CheckoutInfo {
                checked_out_at: Instant::now(),
            },
        );
        self.total_checkouts.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle {
            engine_id: self.id,
            connection_id,
        };
        self.leak_detector.track_checkout(handle);

        Ok(PooledConnection {
            engine: Arc::clone(self),
            handle,
            conn: Some(conn),
            discard: false,
        })
    }

    /// 归还连接（由守卫释放时调用）
    fn checkin(&self, handle: ConnectionHandle, conn: Option<Box<dyn DriverConnection>>, discard: bool) {
        self.leak_detector.track_checkin(handle);

        if self.checked_out.remove(&handle.connection_id).is_none() {
            // 已被泄漏回收，名额早已归还，直接丢弃物理连接
            debug!("迟到归还的已回收连接被丢弃: {}", handle);
            return;
        }

        match conn {
            Some(conn) if !discard && !self.is_closed() && self.open.load(Ordering::SeqCst) <= self.pool_size() => {
                self.push_idle(conn);
            }
            _ => {
                self.open.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.release_slot();
    }

    /// 强制回收泄漏连接的名额，返回是否存在该借出
    pub fn reclaim(&self, connection_id: u64) -> bool {
        if self.checked_out.remove(&connection_id).is_none() {
            return false;
        }
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.release_slot();
        warn!("引擎 {} 已强制回收泄漏连接 conn-{}", self.id, connection_id);
        true
    }

    fn release_slot(&self) {
        self.slots.add_permits(1);
    }

    /// 调整常驻连接数，取值限制在 [1, 总容量]，溢出上限随之变化
    pub fn resize(&self, new_size: u32) -> u32 {
        let new_size = new_size.clamp(1, self.capacity.max(1));
        let old_size = self.pool_size.swap(new_size, Ordering::SeqCst);
        if new_size == old_size {
            return new_size;
        }

        // 关闭超出新常驻数的空闲连接
        let mut closed = 0;
        while self.open.load(Ordering::SeqCst) > new_size {
            match self.pop_idle() {
                Some(conn) => {
                    drop(conn);
                    self.open.fetch_sub(1, Ordering::SeqCst);
                    closed += 1;
                }
                None => break,
            }
        }
        info!(
            "引擎 {} 常驻连接数调整: {} -> {}，溢出上限={}，关闭空闲连接={}",
            self.id,
            old_size,
            new_size,
            self.max_overflow(),
            closed
        );
        new_size
    }

    /// 关闭引擎：拒绝新的借出并关闭空闲连接，已借出的连接归还时关闭
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.slots.close();
        let drained = self.drain_idle();
        info!("引擎 {} 已关闭，释放空闲连接 {} 条", self.id, drained);
        drained
    }

    /// 关闭全部空闲连接
    pub fn drain_idle(&self) -> usize {
        let mut drained = 0;
        while let Some(conn) = self.pop_idle() {
            drop(conn);
            self.open.fetch_sub(1, Ordering::SeqCst);
            drained += 1;
        }
        drained
    }

    pub fn status(&self) -> EngineStatus {
        let now = Instant::now();
        let longest = self
            .checked_out
            .iter()
            .map(|e| now.saturating_duration_since(e.value().checked_out_at).as_secs_f64())
            .fold(0.0, f64::max);

        EngineStatus {
            engine_id: self.id,
            size: self.pool_size(),
            max_overflow: self.max_overflow(),
            checked_out: self.checked_out(),
            overflow: self.overflow(),
            idle: self.idle_count.load(Ordering::SeqCst),
            open: self.open.load(Ordering::SeqCst),
            utilization: self.utilization(),
            total_checkouts: self.total_checkouts.load(Ordering::Relaxed),
            longest_checkout_secs: longest,
        }
    }
}

/// 借出的连接，释放即归还
pub struct PooledConnection {
    engine: Arc<EnginePool>,
    handle: ConnectionHandle,
    conn: Option<Box<dyn DriverConnection>>,
    discard: bool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("handle", &self.handle)
            .field("discard", &self.discard)
            .finish()
    }
}

impl PooledConnection {
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn engine_id(&self) -> u32 {
        self.handle.engine_id
    }

    /// 标记连接状态不可信（超时或中断），归还时直接关闭
    pub fn mark_broken(&mut self) {
        self.discard = true;
    }

    fn conn_mut(&mut self) -> ShieldResult<&mut Box<dyn DriverConnection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| crate::shield_error!(connection, "连接已释放"))
    }

    pub async fn execute(&mut self, query: &str, params: &[JsonValue]) -> ShieldResult<QueryOutcome> {
        self.conn_mut()?.execute(query, params).await
    }

    pub async fn begin(&mut self) -> ShieldResult<()> {
        self.conn_mut()?.begin().await
    }

    pub async fn commit(&mut self) -> ShieldResult<()> {
        self.conn_mut()?.commit().await
    }

    pub async fn rollback(&mut self) -> ShieldResult<()> {
        self.conn_mut()?.rollback().await
    }

    pub async fn ping(&mut self) -> ShieldResult<()> {
        self.conn_mut()?.ping().await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = self.conn.take();
        self.engine.checkin(self.handle, conn, self.discard);
    }
}
