use std::collections::{HashMap, VecDeque};

use log::{debug, trace};

use super::ClientLink;
use crate::{mc::Packet, model::ClientId, world::ChunkKey};

#[derive(Debug, Clone)]
pub struct ScheduledUpdate {
    pub packet: Packet,
    pub commit: Option<(ChunkKey, String)>,
}

impl ScheduledUpdate {
    pub fn new(packet: Packet) -> ScheduledUpdate {
        ScheduledUpdate {
            packet,
            commit: None,
        }
    }

    pub fn committing(packet: Packet, key: ChunkKey, region: &str) -> ScheduledUpdate {
        ScheduledUpdate {
            packet,
            commit: Some((key, region.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Clients whose queue ran empty this tick.
    pub finished: Vec<ClientId>,
    pub commits: Vec<(ClientId, ChunkKey, String)>,
    pub sent: usize,
}

/// Drains per-client update queues a bounded number of packets per tick.
pub struct PacedDelivery {
    per_tick: usize,
    queues: HashMap<ClientId, VecDeque<ScheduledUpdate>>,
}

impl PacedDelivery {
    pub fn new(per_tick: usize) -> PacedDelivery {
        PacedDelivery {
            per_tick: per_tick.max(1),
            queues: HashMap::new(),
        }
    }

    /// Returns whether an unfinished batch was discarded.
    pub fn schedule(&mut self, client: ClientId, updates: Vec<ScheduledUpdate>) -> bool {
        trace!("Scheduling {} updates for {}", updates.len(), client);
        self.queues
            .insert(client, updates.into_iter().collect())
            .is_some()
    }

    pub fn cancel(&mut self, client: ClientId) -> bool {
        self.queues.remove(&client).is_some()
    }

    pub fn is_pending(&self, client: ClientId) -> bool {
        self.queues.contains_key(&client)
    }

    pub fn queued(&self, client: ClientId) -> usize {
        self.queues.get(&client).map_or(0, VecDeque::len)
    }

    pub fn tick(&mut self, link: &mut impl ClientLink) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let per_tick = self.per_tick;

        self.queues.retain(|&client, queue| {
            if !link.is_online(client) {
                debug!("Dropping {} queued updates for offline client {}", queue.len(), client);
                return false;
            }

            for update in queue.drain(..per_tick.min(queue.len())) {
                link.send_packet(client, update.packet);
                if let Some((key, region)) = update.commit {
                    report.commits.push((client, key, region));
                }
                report.sent += 1;
            }

            if queue.is_empty() {
                report.finished.push(client);
                false
            } else {
                true
            }
        });

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::RecordingLink;

    fn keep_alive(id: i32) -> ScheduledUpdate {
        ScheduledUpdate::new(Packet::S00KeepAlive { id })
    }

    #[test]
    fn never_sends_more_than_the_cap_per_tick() {
        let mut pacing = PacedDelivery::new(8);
        let mut link = RecordingLink::default();
        let client = link.join();

        pacing.schedule(client, (0..20).map(keep_alive).collect());

        let report = pacing.tick(&mut link);
        assert_eq!(report.sent, 8);
        assert!(report.finished.is_empty());
        assert_eq!(link.sent(client).len(), 8);

        pacing.tick(&mut link);
        assert_eq!(link.sent(client).len(), 16);

        let report = pacing.tick(&mut link);
        assert_eq!(report.sent, 4);
        assert_eq!(report.finished, vec![client]);
        assert!(!pacing.is_pending(client));
        assert_eq!(
            link.sent(client).last(),
            Some(&Packet::S00KeepAlive { id: 19 })
        );
    }

    #[test]
    fn rescheduling_discards_unsent_updates() {
        let mut pacing = PacedDelivery::new(2);
        let mut link = RecordingLink::default();
        let client = link.join();

        pacing.schedule(client, (0..10).map(keep_alive).collect());
        pacing.tick(&mut link);
        assert!(pacing.schedule(client, (100..103).map(keep_alive).collect()));
        assert_eq!(pacing.queued(client), 3);

        pacing.tick(&mut link);
        pacing.tick(&mut link);
        let ids = link
            .sent(client)
            .iter()
            .map(|p| match p {
                Packet::S00KeepAlive { id } => *id,
                _ => -1,
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 1, 100, 101, 102]);
    }

    #[test]
    fn offline_clients_are_dropped_silently() {
        let mut pacing = PacedDelivery::new(8);
        let mut link = RecordingLink::default();
        let client = link.join();

        pacing.schedule(client, (0..20).map(keep_alive).collect());
        pacing.tick(&mut link);
        link.leave(client);

        let report = pacing.tick(&mut link);
        assert!(report.finished.is_empty());
        assert_eq!(report.sent, 0);
        assert!(!pacing.is_pending(client));
    }

    #[test]
    fn commits_surface_when_delivered() {
        let mut pacing = PacedDelivery::new(1);
        let mut link = RecordingLink::default();
        let client = link.join();
        let key = ChunkKey::new(0, 0);

        pacing.schedule(
            client,
            vec![
                keep_alive(1),
                ScheduledUpdate::committing(Packet::S00KeepAlive { id: 2 }, key, "beta"),
            ],
        );

        assert!(pacing.tick(&mut link).commits.is_empty());
        let report = pacing.tick(&mut link);
        assert_eq!(report.commits, vec![(client, key, "beta".to_string())]);
        assert_eq!(report.finished, vec![client]);
    }

    #[test]
    fn empty_batches_finish_on_the_next_tick() {
        let mut pacing = PacedDelivery::new(8);
        let mut link = RecordingLink::default();
        let client = link.join();

        pacing.schedule(client, Vec::new());
        assert_eq!(pacing.tick(&mut link).finished, vec![client]);
    }
}
