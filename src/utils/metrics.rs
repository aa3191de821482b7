use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::utils::format::byteformat;

#[derive(Debug, Clone)]
pub struct DaemonMetrics {
    pub datagrams_received: u64,
    pub datagrams_rejected: u64,
    pub hello_replies: u64,
    pub search_replies: u64,
    pub listings_served: u64,
    pub files_served: u64,
    pub bytes_served: u64,
    pub not_found: u64,
    pub uptime: Duration,
    pub start_time: Instant,
}

impl Default for DaemonMetrics {
    fn default() -> Self {
        Self {
            datagrams_received: 0,
            datagrams_rejected: 0,
            hello_replies: 0,
            search_replies: 0,
            listings_served: 0,
            files_served: 0,
            bytes_served: 0,
            not_found: 0,
            uptime: Duration::new(0, 0),
            start_time: Instant::now(),
        }
    }
}

#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<DaemonMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_datagram(&self) {
        self.metrics.write().await.datagrams_received += 1;
    }

    pub async fn record_rejected_datagram(&self) {
        self.metrics.write().await.datagrams_rejected += 1;
    }

    pub async fn record_hello_reply(&self) {
        self.metrics.write().await.hello_replies += 1;
    }

    pub async fn record_search_replies(&self, count: u64) {
        self.metrics.write().await.search_replies += count;
    }

    pub async fn record_listing(&self) {
        self.metrics.write().await.listings_served += 1;
    }

    pub async fn record_file_served(&self, bytes: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.files_served += 1;
        metrics.bytes_served += bytes;
    }

    pub async fn record_not_found(&self) {
        self.metrics.write().await.not_found += 1;
    }

    pub async fn get_metrics(&self) -> DaemonMetrics {
        let mut metrics = self.metrics.read().await.clone();
        metrics.uptime = metrics.start_time.elapsed();
        metrics
    }

    pub async fn print_stats(&self) {
        let metrics = self.get_metrics().await;

        println!("\n=== lan-share statistics ===");
        println!("Uptime: {:.2?}", metrics.uptime);
        println!(
            "Datagrams: {} received, {} rejected",
            metrics.datagrams_received, metrics.datagrams_rejected
        );
        println!(
            "Replies: {} hello, {} search results",
            metrics.hello_replies, metrics.search_replies
        );
        println!(
            "HTTP: {} listings, {} files ({}), {} not found",
            metrics.listings_served,
            metrics.files_served,
            byteformat(metrics.bytes_served),
            metrics.not_found
        );
        println!("============================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_accumulate() {
        let collector = MetricsCollector::new();
        collector.record_datagram().await;
        collector.record_datagram().await;
        collector.record_search_replies(5).await;
        collector.record_file_served(1024).await;
        collector.record_file_served(10).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.datagrams_received, 2);
        assert_eq!(metrics.search_replies, 5);
        assert_eq!(metrics.files_served, 2);
        assert_eq!(metrics.bytes_served, 1034);
    }
}
