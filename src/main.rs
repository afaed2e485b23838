//! Nebula player CLI - inspect, play back and record `.nbl` animations.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nebula_player::{
    animation::{AnimationFile, AnimationRecorder, ParticleSample, RecorderConfig, TextureEntry},
    gpu::{HeadlessUploader, HostBackend, TextureCache, UploadPipeline},
    playback::{ExternalClock, PlayerError, SessionManager, TimeSource, WallClock},
    schema::PlayerConfig,
    stream::BufferPool,
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "--example" => {
            print_example_config();
            return;
        }
        "--demo" => {
            let Some(out) = args.get(2) else {
                print_usage(&args[0]);
                std::process::exit(1);
            };
            if let Err(e) = record_demo(Path::new(out)) {
                eprintln!("Error recording demo: {}", e);
                std::process::exit(1);
            }
            return;
        }
        _ => {}
    }

    let path = PathBuf::from(&args[1]);
    let export = args.iter().any(|a| a == "--export");
    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let Some(config_path) = args.get(i + 1) else {
                eprintln!("--config requires a path");
                std::process::exit(1);
            };
            PlayerConfig::from_json_file(config_path).unwrap_or_else(|e| {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            })
        }
        None => PlayerConfig::default(),
    };

    if let Err(e) = play(&path, export, config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <file.nbl> [--export] [--config cfg.json]", program);
    eprintln!("       {} --demo <out.nbl>", program);
    eprintln!("       {} --example", program);
    eprintln!();
    eprintln!("Play a Nebula particle animation headlessly and report statistics.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --export      Step a frame-accurate clock instead of real time");
    eprintln!("  --config      Load player configuration from JSON");
    eprintln!("  --demo        Record a small procedural animation");
    eprintln!("  --example     Print the default configuration");
}

fn play(path: &Path, export: bool, config: PlayerConfig) -> Result<(), PlayerError> {
    let file = AnimationFile::open(path)?;
    let header = file.header();
    let bbox = file.bbox();

    println!("Nebula Animation");
    println!("================");
    println!("File: {}", path.display());
    println!("Version: {}", header.version);
    println!(
        "Frames: {} @ {} fps ({:.2}s)",
        file.total_frames(),
        file.fps(),
        file.duration()
    );
    println!("Keyframes: {}", file.keyframes().len());
    println!("Textures: {}", file.textures().len());
    for entry in file.textures() {
        println!("  {} ({}x{})", entry.path, entry.rows, entry.cols);
    }
    println!("Bounds: {:?} .. {:?}", bbox.min, bbox.max);
    println!("Mode: {}", if export { "export" } else { "interactive" });
    println!();

    let fps = f64::from(file.fps());
    let stepper = export.then(|| {
        let clock = Arc::new(ExternalClock::new());
        clock.set_time(0.0);
        clock.set_exporting(true);
        clock
    });
    let clock: Arc<dyn TimeSource> = match &stepper {
        Some(clock) => clock.clone(),
        None => Arc::new(WallClock::new()),
    };

    let pool = Arc::new(BufferPool::new(config.pool.clone()));
    let textures = TextureCache::new(Arc::new(HeadlessUploader::new()));
    let mut pipeline = UploadPipeline::new(HostBackend::new(), &config.upload)?;
    let mut manager = SessionManager::new(config, clock, Arc::clone(&pool), textures);

    let Some(id) = manager.start_session(path, [0.0; 3])? else {
        println!("In-game rendering is disabled; nothing to play.");
        return Ok(());
    };

    println!("Playing...");
    let start = Instant::now();
    let frame_time = Duration::from_secs_f64(1.0 / fps);
    let mut ticks: u64 = 0;
    let mut peak_particles = 0;

    while manager.session(id).is_some() {
        match &stepper {
            // Middle of the next frame
            Some(clock) => clock.set_time((ticks as f64 + 0.5) / fps),
            None => std::thread::sleep(frame_time),
        }
        let stats = manager.render(&mut pipeline, [0.0; 3], |_| true)?;
        peak_particles = peak_particles.max(stats.particles);
        ticks += 1;
    }

    let elapsed = start.elapsed();
    let backend = pipeline.backend();
    let upload = pipeline.stats();

    println!();
    println!("Playback finished:");
    println!("  Ticks: {}", ticks);
    println!("  Frames drawn: {}", backend.draw_calls());
    println!("  Particles drawn: {}", backend.particles_drawn());
    println!("  Peak particles: {}", peak_particles);
    println!(
        "  Uploaded: {:.2} MB in {} uploads ({} reallocations, {} fence timeouts)",
        upload.bytes_uploaded as f64 / (1024.0 * 1024.0),
        upload.uploads,
        upload.reallocations,
        upload.fence_timeouts
    );
    println!(
        "  Pool: {} buffers, {:.2} MB allocated",
        pool.pooled_count(),
        pool.allocated_bytes() as f64 / (1024.0 * 1024.0)
    );
    println!("Time: {:.2}s", elapsed.as_secs_f32());

    manager.clear_all(&mut pipeline)?;
    Ok(())
}

/// Record a rotating spiral of particles that fade in, drift and die.
fn record_demo(out: &Path) -> std::io::Result<()> {
    const PARTICLES: u32 = 2000;
    const FRAMES: u32 = 120;

    let config = RecorderConfig {
        fps: 30,
        keyframe_interval: 30,
        textures: vec![
            TextureEntry::new("nebula:textures/particle/spark.png", 2, 2),
            TextureEntry::new("nebula:textures/particle/smoke.png", 4, 4),
        ],
        ..Default::default()
    };
    let mut recorder = AnimationRecorder::new(out, config)?;

    println!("Recording {} frames to {}...", FRAMES, out.display());
    let mut particles = Vec::with_capacity(PARTICLES as usize);
    for frame in 0..FRAMES {
        particles.clear();
        let t = frame as f32 / 30.0;
        for id in 0..PARTICLES {
            // Each particle lives for 60 frames starting at a staggered offset
            let birth = id % 60;
            if frame < birth || frame >= birth + 60 {
                continue;
            }
            let age = (frame - birth) as f32 / 60.0;
            let angle = id as f32 * 0.137 + t;
            let radius = 1.0 + age * 4.0;
            particles.push(ParticleSample {
                id,
                position: [radius * angle.cos(), age * 3.0, radius * angle.sin()],
                color: [255, (200.0 - age * 150.0) as u8, 80, (120.0 * (1.0 - age)) as u8],
                size: 0.2 + age * 0.5,
                tex: (id % 2) as u8,
                seq: ((frame - birth) / 4) as u8,
            });
        }
        recorder.record_frame(&particles)?;
    }

    let stats = recorder.finalize()?;
    println!("{}", stats);
    Ok(())
}

fn print_example_config() {
    let config = PlayerConfig::default();
    match serde_json::to_string_pretty(&config) {
        Ok(json) => {
            println!("Example configuration (config.json):");
            println!("{}", json);
        }
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
