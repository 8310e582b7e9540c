//! Fan-out from one UpTrack to many DownTracks via a pool of worker
//! tasks, each owning a disjoint subset of subscribers (spec.md §4.7).

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::cache::seq::seq_diff;
use crate::cache::PacketCache;
use crate::down_track::DownTrack;
use crate::mailbox::{Mailbox, TrackAction};

/// One cached packet's coordinates, dispatched by seqno/index rather
/// than by value so workers re-fetch from the cache (spec.md §9's
/// "ring-buffer index invalidation" note: `get_at` must re-verify).
#[derive(Debug, Clone, Copy)]
pub struct Dispatch {
    pub seqno: u16,
    pub index: usize,
    pub delay: Duration,
    pub is_video: bool,
    pub marker: bool,
}

enum WorkerAction {
    AddTrack(Arc<DownTrack>),
    RemoveTrack(u32),
}

const PACKET_CHANNEL_CAPACITY: usize = 32;
/// Packets to skip after a full non-blocking send on a video worker,
/// discarding the rest of the frame rather than individual packets.
const VIDEO_DROP_FRAME_BUDGET: u32 = 7;

struct Worker {
    packet_tx: mpsc::Sender<Dispatch>,
    action_tx: mpsc::UnboundedSender<WorkerAction>,
    track_count: Arc<AtomicUsize>,
    /// Owned by the *pool* side, since it's the `try_send` call site
    /// that observes the full channel. 0 means "not currently dropping".
    drop_remaining: Arc<AtomicU32>,
}

pub struct WriterPool {
    cache: Arc<std::sync::Mutex<PacketCache>>,
    cname: Arc<std::sync::Mutex<Option<String>>>,
    video_clock_rate: Option<u32>,
    request_keyframe: Mailbox<TrackAction<Arc<DownTrack>>>,
    workers: std::sync::Mutex<Vec<Worker>>,
}

impl WriterPool {
    pub fn new(
        cache: Arc<std::sync::Mutex<PacketCache>>,
        cname: Arc<std::sync::Mutex<Option<String>>>,
        video_clock_rate: Option<u32>,
        request_keyframe: Mailbox<TrackAction<Arc<DownTrack>>>,
    ) -> Self {
        WriterPool {
            cache,
            cname,
            video_clock_rate,
            request_keyframe,
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn cap(&self, worker_count: usize) -> usize {
        4.max((worker_count as f64).sqrt() as usize)
    }

    /// Tries existing workers in order; spawns a new one if none
    /// accepts (all are at the negotiated subscriber cap).
    pub fn add(&self, track: Arc<DownTrack>) {
        let mut workers = self.workers.lock().unwrap();
        let cap = self.cap(workers.len().max(1));
        for w in workers.iter() {
            if w.track_count.load(Ordering::Relaxed) < cap {
                w.track_count.fetch_add(1, Ordering::Relaxed);
                let _ = w.action_tx.send(WorkerAction::AddTrack(track));
                return;
            }
        }

        let worker = self.spawn_worker();
        worker.track_count.fetch_add(1, Ordering::Relaxed);
        let _ = worker.action_tx.send(WorkerAction::AddTrack(track));
        workers.push(worker);
    }

    pub fn remove(&self, ssrc: u32) {
        let workers = self.workers.lock().unwrap();
        for w in workers.iter() {
            let _ = w.action_tx.send(WorkerAction::RemoveTrack(ssrc));
        }
    }

    fn spawn_worker(&self) -> Worker {
        let (packet_tx, packet_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let cache = self.cache.clone();
        let cname = self.cname.clone();
        let video_clock_rate = self.video_clock_rate;
        let request_keyframe = self.request_keyframe.clone();

        tokio::spawn(run_worker(
            cache,
            cname,
            video_clock_rate,
            request_keyframe,
            packet_rx,
            action_rx,
        ));

        Worker {
            packet_tx,
            action_tx,
            track_count: Arc::new(AtomicUsize::new(0)),
            drop_remaining: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Dispatches one packet to every worker per spec.md §4.7's policy:
    /// a marker packet always clears a worker's drop counter; a full
    /// channel on a video worker starts (or continues) dropping the
    /// rest of the frame; a full channel on an audio worker waits up to
    /// `delay / (2 * worker_count)` for a slot before giving up.
    pub async fn dispatch(&self, d: Dispatch) {
        let workers: Vec<_> = {
            let workers = self.workers.lock().unwrap();
            workers
                .iter()
                .map(|w| (w.packet_tx.clone(), w.drop_remaining.clone()))
                .collect()
        };
        let worker_count = workers.len().max(1);

        for (tx, drop_remaining) in &workers {
            if d.marker {
                drop_remaining.store(0, Ordering::Relaxed);
            } else if drop_remaining.load(Ordering::Relaxed) > 0 {
                drop_remaining.fetch_sub(1, Ordering::Relaxed);
                continue;
            }

            match tx.try_send(d) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(d)) => {
                    if d.is_video {
                        drop_remaining.store(VIDEO_DROP_FRAME_BUDGET, Ordering::Relaxed);
                        continue;
                    }
                    let wait = d.delay / (2 * worker_count as u32).max(1);
                    let _ = timeout(wait, tx.reserve()).await;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

/// A replayed keyframe is considered current enough to send as-is when
/// it's within this many packets of the most recent arrival, or (for a
/// 90 kHz video clock) within 2 seconds of RTP time (spec.md §4.7).
const KEYFRAME_REPLAY_PACKET_WINDOW: i32 = 40;
const KEYFRAME_REPLAY_TIME_WINDOW_90KHZ: u32 = 2 * 90_000;

/// Replays the buffered keyframe to a newly added subscriber if it's
/// still recent enough to be useful, otherwise asks the publisher for a
/// fresh one.
async fn on_track_added(
    cache: &Arc<std::sync::Mutex<PacketCache>>,
    video_clock_rate: Option<u32>,
    request_keyframe: &Mailbox<TrackAction<Arc<DownTrack>>>,
    track: &Arc<DownTrack>,
) {
    let replay: Option<Vec<Bytes>> = {
        let c = cache.lock().unwrap();
        let (kf_ts, complete, seqnos) = c.keyframe();
        let first_seqno = seqnos.first().copied();
        let is_recent = match (c.last(), first_seqno) {
            (Some((last_seqno, last_ts)), Some(first_seqno)) => {
                let packet_distance = seq_diff(last_seqno, first_seqno);
                let close_by_packets =
                    (0..=KEYFRAME_REPLAY_PACKET_WINDOW).contains(&packet_distance);
                let close_by_time = video_clock_rate == Some(90_000)
                    && last_ts.wrapping_sub(kf_ts) <= KEYFRAME_REPLAY_TIME_WINDOW_90KHZ;
                close_by_packets || close_by_time
            }
            _ => false,
        };

        if complete && is_recent {
            Some(seqnos.iter().filter_map(|&s| c.get(s)).collect())
        } else {
            None
        }
    };

    match replay {
        Some(packets) => {
            for payload in packets {
                if let Err(err) = track.write(&payload).await {
                    log::warn!("down track {} keyframe replay failed: {}", track.ssrc, err);
                }
            }
        }
        None => {
            request_keyframe.send(TrackAction::RequestKeyframe);
        }
    }
}

async fn run_worker(
    cache: Arc<std::sync::Mutex<PacketCache>>,
    cname: Arc<std::sync::Mutex<Option<String>>>,
    video_clock_rate: Option<u32>,
    request_keyframe: Mailbox<TrackAction<Arc<DownTrack>>>,
    mut packet_rx: mpsc::Receiver<Dispatch>,
    mut action_rx: mpsc::UnboundedReceiver<WorkerAction>,
) {
    let mut tracks: Vec<Arc<DownTrack>> = Vec::new();

    loop {
        tokio::select! {
            action = action_rx.recv() => {
                match action {
                    Some(WorkerAction::AddTrack(t)) => {
                        if let Some(name) = cname.lock().unwrap().clone() {
                            t.set_cname(name);
                        }
                        on_track_added(&cache, video_clock_rate, &request_keyframe, &t).await;
                        tracks.push(t);
                    }
                    Some(WorkerAction::RemoveTrack(ssrc)) => tracks.retain(|t| t.ssrc != ssrc),
                    None => return,
                }
            }
            dispatch = packet_rx.recv() => {
                let Some(d) = dispatch else { return };

                let payload = {
                    let c = cache.lock().unwrap();
                    c.get_at(d.seqno, d.index).or_else(|| c.get(d.seqno))
                };
                let Some(payload) = payload else { continue };

                tracks.retain(|t| !t.is_closed());
                for t in &tracks {
                    if let Err(err) = t.write(&payload).await {
                        log::warn!("down track {} write failed: {}", t.ssrc, err);
                    }
                }
            }
        }
    }
}
