//! # Flush Coordination
//!
//! `platformCoordinator.flushIntakePipeline()` flushes stages in
//! topological order; correctness requires that no new items are
//! injected into a stage after it is flushed until downstream stages
//! are flushed too. The topological order is computed once,
//! at wiring time, not re-derived on every flush.

use crate::stage::StageHandle;

/// A precomputed, topologically-ordered flush plan over a set of
/// stages. The wiring layer (`node-runtime`) builds one of these once
/// and reuses it for every flush.
pub struct FlushCoordinator {
    order: Vec<StageHandle>,
}

impl FlushCoordinator {
    /// `stages` must already be in topological order (upstream before
    /// downstream); this type does not derive one.
    #[must_use]
    pub fn new(stages: Vec<StageHandle>) -> Self {
        Self { order: stages }
    }

    /// Flushes every stage strictly in the precomputed order. Because
    /// each `flush` blocks until that stage has drained, downstream
    /// stages only start flushing once everything upstream of them has
    /// stopped producing new work.
    pub async fn flush_all(&self) {
        for stage in &self.order {
            stage.flush().await;
        }
    }

    pub fn shutdown_all(&self) {
        for stage in &self.order {
            stage.shutdown();
        }
    }

    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.order.iter().map(StageHandle::name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::spawn_sequential;
    use crate::wire::Wire;

    #[tokio::test]
    async fn test_flush_all_waits_for_every_stage() {
        let (wire_a, rx_a, pending_a) = Wire::channel(4);
        let (wire_b, rx_b, pending_b) = Wire::channel(4);

        let wire_b_clone = wire_b.clone();
        let stage_a = spawn_sequential("a", rx_a, pending_a, move |item: u32| {
            let wire_b = wire_b_clone.clone();
            async move {
                let _ = wire_b.solder_to(item).await;
            }
        });
        let stage_b = spawn_sequential("b", rx_b, pending_b, |_item: u32| async {});

        let coordinator = FlushCoordinator::new(vec![stage_a, stage_b]);
        for i in 0..3u32 {
            wire_a.solder_to(i).await.unwrap();
        }
        coordinator.flush_all().await;
        assert_eq!(coordinator.stage_names(), vec!["a", "b"]);
    }
}
