//! Media session demo
//!
//! Drives a session from several caller threads while every mutation runs on
//! one execution context, then prints the resulting state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use rvoip_media_session::logging::{parse_log_level, setup_logging, LoggingConfig};
use rvoip_media_session::prelude::*;
use rvoip_media_session::srtp;

#[derive(Parser, Debug)]
#[command(name = "media_session_demo", about = "Deferred mutation media session demo")]
struct Args {
    /// Enable RTP/RTCP multiplexing
    #[arg(long)]
    rtcp_mux: bool,

    /// Incoming SRTP key (base64); a fixed test key is used if omitted
    #[arg(long)]
    incoming_key: Option<String>,

    /// Outgoing SRTP key (base64)
    #[arg(long)]
    outgoing_key: Option<String>,

    /// Number of caller threads racing to add receive payloads
    #[arg(long, default_value_t = 4)]
    callers: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(LoggingConfig::new(parse_log_level(&args.log_level)?))?;

    let incoming_key = args
        .incoming_key
        .unwrap_or_else(|| srtp::encode_key(&[0x2B; srtp::SRTP_KEY_LENGTH]));
    let mut builder = MediaSessionConfig::builder()
        .rtcp_mux(args.rtcp_mux)
        .incoming_srtp_key(incoming_key);
    if let Some(key) = args.outgoing_key {
        builder = builder.outgoing_srtp_key(key);
    }

    let scheduler = ContextScheduler::start("media-context")?;
    let session = MediaSession::new(builder.build(), scheduler.clone());
    session.assign_identity(rand_ssrc(), "demo@rvoip")?;

    let payload_changes = Arc::new(AtomicUsize::new(0));
    let counter = payload_changes.clone();
    session.set_on_send_payload(Arc::new(move |session: &Arc<MediaSession>| {
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(payload) = session.send_payload() {
            info!("Send payload is now {}", payload);
        }
    }));
    session.set_on_send_source(Arc::new(|session: &Arc<MediaSession>| {
        if let Some(source) = session.send_source() {
            info!("Send source is now {}", source);
        }
    }));

    // Every caller tries to register the same set of payload types
    let callers: Vec<_> = (0..args.callers)
        .map(|caller| {
            let session = session.clone();
            thread::spawn(move || -> rvoip_media_session::Result<()> {
                session.add_receive_payload(Payload::audio(0, "PCMU", 8000, 1).shared())?;
                session.add_receive_payload(Payload::audio(8, "PCMA", 8000, 1).shared())?;
                session.add_receive_payload(Payload::audio(111, "OPUS", 48000, 2).shared())?;
                session.add_receive_payload(Payload::video(96 + caller as u32 % 2, "VP8", 90000).shared())?;
                Ok(())
            })
        })
        .collect();
    for caller in callers {
        caller
            .join()
            .map_err(|_| anyhow::anyhow!("caller thread panicked"))??;
    }

    let mut events = session
        .subscribe_events()
        .ok_or_else(|| anyhow::anyhow!("session events closed"))?;

    session.set_send_payload(Payload::audio(111, "OPUS", 48000, 2).shared())?;
    session.set_send_source(MediaSource::new("microphone", MediaType::Audio, SourceType::Capture))?;
    session.set_send_payload(Payload::audio(0, "PCMU", 8000, 1).shared())?;

    session.report_incoming_source(MediaSource::new("peer-audio", MediaType::Audio, SourceType::Remote))?;
    let mut stats = SessionStats::new();
    stats.insert("receive-payloads".to_string(), session.receive_payloads().len().into());
    stats.insert("rtcp-mux".to_string(), session.rtcp_mux().into());
    session.report_stats(stats)?;

    scheduler.flush_blocking()?;
    session.teardown();

    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::IncomingSource { source, .. } => println!("incoming source:    {}", source),
            SessionEvent::NewStats { stats, .. } => {
                println!("stats:              {}", serde_json::to_string(&*stats)?)
            }
        }
    }

    let stats = session.mutation_stats();
    println!("session:            {}", session.id());
    println!("ssrc / cname:       {:#010x} / {}", session.send_ssrc(), session.cname().unwrap_or("-"));
    println!("rtcp-mux:           {}", session.rtcp_mux());
    println!("receive payloads:   {:?}", session.receive_payloads().payload_types());
    println!(
        "send payload:       {}",
        session.send_payload().map(|p| p.to_string()).unwrap_or_else(|| "-".into())
    );
    println!(
        "send source:        {}",
        session.send_source().map(|s| s.to_string()).unwrap_or_else(|| "-".into())
    );
    println!("incoming key bytes: {}", session.srtp_key_buffer(KeyRole::Incoming)?.len());
    println!("outgoing key bytes: {}", session.srtp_key_buffer(KeyRole::Outgoing)?.len());
    println!(
        "mutations:          {} submitted, {} applied, {} rejected",
        stats.submitted(),
        stats.applied(),
        stats.rejected()
    );
    println!("payload callbacks:  {}", payload_changes.load(Ordering::Relaxed));
    println!(
        "ownership:          {} retained, {} released",
        session.ownership().retained(),
        session.ownership().released()
    );

    scheduler.shutdown();
    Ok(())
}

fn rand_ssrc() -> u32 {
    uuid::Uuid::new_v4().as_u128() as u32
}
