//! 主机资源探测
//!
//! 读取失败时退回上一次的读数（首次失败为零），从不向外抛出错误

use super::sample::HostReading;
use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use sysinfo::{Networks, System};

/// 主机资源探测接口
pub trait HostProbe: Send + Sync {
    /// 读取当前主机资源
    fn read(&self) -> HostReading;
}

/// 基于 sysinfo 的主机探测器
pub struct SysinfoProbe {
    inner: Mutex<ProbeState>,
}

struct ProbeState {
    system: System,
    networks: Networks,
    last: HostReading,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            inner: Mutex::new(ProbeState {
                system,
                networks: Networks::new_with_refreshed_list(),
                last: HostReading::default(),
            }),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeState {
    fn cpu_percent(&mut self) -> anyhow::Result<f64> {
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(anyhow!("无法读取CPU信息"));
        }
        Ok(cpus.iter().map(|cpu| cpu.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64)
    }

    fn memory_percent(&mut self) -> anyhow::Result<f64> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(anyhow!("无法读取内存总量"));
        }
        Ok(self.system.used_memory() as f64 / total as f64 * 100.0)
    }

    fn disk_io_bytes(&mut self) -> anyhow::Result<u64> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("获取当前进程ID失败: {}", e))?;
        self.system.refresh_process(pid);
        let process = self.system.process(pid).context("读取当前进程信息失败")?;
        let usage = process.disk_usage();
        Ok(usage.total_read_bytes + usage.total_written_bytes)
    }

    fn network_io_bytes(&mut self) -> anyhow::Result<u64> {
        self.networks.refresh();
        let total = self
            .networks
            .iter()
            .map(|(_name, data)| data.total_received() + data.total_transmitted())
            .sum();
        Ok(total)
    }
}

impl HostProbe for SysinfoProbe {
    fn read(&self) -> HostReading {
        let mut state = self.inner.lock();
        let last = state.last;

        let reading = HostReading {
            cpu_percent: state.cpu_percent().unwrap_or_else(|e| {
                debug_log!("CPU读数失败，沿用上次值: {}", e);
                last.cpu_percent
            }),
            memory_percent: state.memory_percent().unwrap_or_else(|e| {
                debug_log!("内存读数失败，沿用上次值: {}", e);
                last.memory_percent
            }),
            disk_io_bytes: state.disk_io_bytes().unwrap_or_else(|e| {
                debug_log!("磁盘IO读数失败，沿用上次值: {}", e);
                last.disk_io_bytes
            }),
            network_io_bytes: state.network_io_bytes().unwrap_or_else(|e| {
                debug_log!("网络IO读数失败，沿用上次值: {}", e);
                last.network_io_bytes
            }),
        };

        state.last = reading;
        reading
    }
}

/// 返回固定读数的探测器
#[derive(Debug, Default)]
pub struct StaticProbe {
    reading: Mutex<HostReading>,
}

impl StaticProbe {
    pub fn new(reading: HostReading) -> Self {
        Self {
            reading: Mutex::new(reading),
        }
    }

    /// 替换后续返回的读数
    pub fn set(&self, reading: HostReading) {
        *self.reading.lock() = reading;
    }
}

impl HostProbe for StaticProbe {
    fn read(&self) -> HostReading {
        *self.reading.lock()
    }
}
