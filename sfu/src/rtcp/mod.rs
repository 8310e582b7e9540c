//! RTCP control loop: up-path generation (RR/REMB), down-path generation
//! (SR/SDES), and down-path listening (loss-based rate control,
//! PLI/FIR/REMB/NACK ingestion) (spec.md §2, §4.9-§4.11).

pub mod down_generator;
pub mod down_listener;
pub mod up_generator;

use std::sync::Arc;
use std::time::Duration;

use rtcp::packet::{marshal, unmarshal, Packet as RtcpPacket};

use crate::down_track::DownTrack;
use crate::endpoint::{RtcpReader, RtcpWriter};
use crate::error::Result;
use crate::time::now_jiffies;
use crate::up_track::UpTrack;

/// 1 Hz per spec.md §4.9.
pub const UP_GENERATOR_INTERVAL: Duration = Duration::from_secs(1);
/// 2 Hz per spec.md §4.10.
pub const DOWN_GENERATOR_INTERVAL: Duration = Duration::from_millis(500);

const MAX_RTCP_PACKET_SIZE: usize = 1504;

/// Drives one upstream peer connection's 1 Hz RTCP sender: composes and
/// writes a ReceiverReport (plus REMB, when any track advertises
/// `goog-remb`) on every tick, and resizes each UpTrack's cache to the
/// worst case RTO across its subscribers.
pub async fn run_up_generator(
    sender_ssrc: u32,
    tracks_and_subscribers: Vec<(Arc<UpTrack>, Vec<Arc<DownTrack>>)>,
    writer: Arc<dyn RtcpWriter>,
) {
    let mut ticker = tokio::time::interval(UP_GENERATOR_INTERVAL);
    loop {
        ticker.tick().await;

        let tracks: Vec<Arc<UpTrack>> = tracks_and_subscribers.iter().map(|(t, _)| t.clone()).collect();
        if tracks.is_empty() {
            continue;
        }

        let mut pkts: Vec<Box<dyn RtcpPacket + Send + Sync>> =
            vec![Box::new(up_generator::compose_receiver_report(sender_ssrc, &tracks))];
        if let Some(remb) = up_generator::compose_remb(sender_ssrc, &tracks_and_subscribers) {
            pkts.push(Box::new(remb));
        }

        if let Err(err) = writer.write(&pkts).await {
            log::debug!("up rtcp generator write failed: {}", err);
        }

        for (track, subscribers) in &tracks_and_subscribers {
            up_generator::update_up_track_cache(track, subscribers);
        }
    }
}

/// Drives one DownTrack's 2 Hz RTCP sender: SenderReport + SourceDescription.
pub async fn run_down_generator(track: Arc<DownTrack>, clock_rate: u32, writer: Arc<dyn RtcpWriter>) {
    let mut ticker = tokio::time::interval(DOWN_GENERATOR_INTERVAL);
    loop {
        ticker.tick().await;
        if track.is_closed() {
            return;
        }

        let pkts = down_generator::compose_tick(&track, clock_rate);
        if pkts.is_empty() {
            continue;
        }
        if let Err(err) = writer.write(&pkts).await {
            log::debug!("down track {} rtcp generator write failed: {}", track.ssrc, err);
        }
    }
}

/// Drains RTCP off a DownTrack's feedback channel until EOF or error,
/// dispatching each batch through [`down_listener::handle_rtcp`].
pub async fn run_down_listener(track: Arc<DownTrack>, up: Arc<UpTrack>, reader: Arc<dyn RtcpReader>) {
    let mut buf = vec![0u8; MAX_RTCP_PACKET_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                log::debug!("down track {} rtcp reader closed: {}", track.ssrc, err);
                break;
            }
        };

        let pkts = match decode(&buf[..n]) {
            Ok(pkts) => pkts,
            Err(err) => {
                log::debug!("down track {} rtcp parse error: {}", track.ssrc, err);
                continue;
            }
        };

        down_listener::handle_rtcp(&track, &up, &pkts, now_jiffies()).await;
    }
}

fn decode(raw: &[u8]) -> Result<Vec<Box<dyn RtcpPacket + Send + Sync>>> {
    let mut b = bytes::Bytes::copy_from_slice(raw);
    Ok(unmarshal(&mut b)?)
}

/// Re-marshals and writes a batch of RTCP packets; a thin wrapper kept
/// alongside `decode` so callers needing both live in one module.
pub fn encode(pkts: &[Box<dyn RtcpPacket + Send + Sync>]) -> Result<bytes::Bytes> {
    Ok(marshal(pkts)?)
}
