use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use innkeep::engine::{Engine, EngineError};
use innkeep::model::{GuestDetails, ReservationRequest, RoomId};

const ROOMS: RoomId = 20;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date")
}

fn guest(i: u64) -> GuestDetails {
    GuestDetails {
        first_name: format!("Guest{i}"),
        last_name: "Bench".into(),
        email: format!("guest{i}@example.com"),
        phone: "555-0100".into(),
    }
}

fn request(room_id: RoomId, night: u64, i: u64) -> ReservationRequest {
    let start = epoch() + Days::new(night);
    ReservationRequest {
        room_id,
        start,
        end: start + Days::new(1),
        guest: guest(i),
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn open_engine(dir: &std::path::Path, name: &str) -> Arc<Engine> {
    let path = dir.join(format!("{name}.wal"));
    let _ = std::fs::remove_file(&path);
    let engine = Arc::new(Engine::open(path).expect("open engine"));
    for id in 0..ROOMS {
        engine
            .create_room(id, format!("Room {id}"))
            .await
            .expect("create room");
    }
    engine
}

async fn phase1_sequential(engine: &Engine) {
    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        engine
            .create_reservation(&request(0, i, i))
            .await
            .expect("sequential booking");
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(engine: Arc<Engine>) {
    let n_tasks = ROOMS as u64;
    let n_per_task = 200u64;

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .create_reservation(&request(t as RoomId, 3000 + j, j))
                    .await
                    .expect("concurrent booking");
            }
        }));
    }
    for h in handles {
        h.await.expect("task");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended(engine: Arc<Engine>) {
    let n_tasks = 64u64;
    let booked = Arc::new(AtomicU64::new(0));
    let refused = Arc::new(AtomicU64::new(0));

    // Everyone fights over the same week of room 1.
    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        let booked = booked.clone();
        let refused = refused.clone();
        handles.push(tokio::spawn(async move {
            let from = epoch() + Days::new(5000 + i % 7);
            let req = ReservationRequest {
                room_id: 1,
                start: from,
                end: from + Days::new(7),
                guest: guest(i),
            };
            match engine.create_reservation(&req).await {
                Ok(_) => booked.fetch_add(1, Ordering::Relaxed),
                Err(EngineError::RoomUnavailable { .. }) => refused.fetch_add(1, Ordering::Relaxed),
                Err(e) => panic!("unexpected error: {e}"),
            };
        }));
    }
    for h in handles {
        h.await.expect("task");
    }
    println!(
        "  {n_tasks} overlapping attempts in {:.2}ms: {} booked, {} refused",
        start.elapsed().as_secs_f64() * 1000.0,
        booked.load(Ordering::Relaxed),
        refused.load(Ordering::Relaxed),
    );
}

async fn phase4_read_under_load(engine: Arc<Engine>) {
    let stop = Arc::new(AtomicBool::new(false));

    let mut writers = Vec::new();
    for w in 0..4u64 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let room = (2 + w) as RoomId;
            let mut night = 10_000u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.create_reservation(&request(room, night, night)).await;
                night += 1;
            }
        }));
    }

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let from = epoch() + Days::new((i % 3000) as u64);
        let t = Instant::now();
        engine
            .check_all_rooms(from, from + Days::new(3))
            .await
            .expect("availability");
        latencies.push(t.elapsed());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("check_all_rooms latency", &mut latencies);
}

async fn phase5_compaction(engine: Arc<Engine>) {
    let appends = engine.wal_appends_since_compact().await;
    let start = Instant::now();
    engine.compact_wal().await.expect("compact");
    println!(
        "  compacted after {appends} appends in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("innkeep_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("bench dir");

    println!("=== innkeep stress benchmark ===");
    println!("data: {}\n", dir.display());

    let engine = open_engine(&dir, "bench").await;

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] concurrent bookings, one room per task");
    phase2_concurrent(engine.clone()).await;

    println!("\n[phase 3] contended bookings on one room");
    phase3_contended(engine.clone()).await;

    println!("\n[phase 4] availability latency under write load");
    phase4_read_under_load(engine.clone()).await;

    println!("\n[phase 5] WAL compaction");
    phase5_compaction(engine).await;

    let _ = std::fs::remove_dir_all(&dir);
    println!("\n=== benchmark complete ===");
}
