use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use people_counter::config::CounterdConfig;
use people_counter::RestartPolicy;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "COUNTER_CONFIG",
        "COUNTER_BACKEND_URL",
        "COUNTER_AUTH_TOKEN",
        "COUNTER_VIDEOS_DIR",
        "COUNTER_DETECTOR",
        "COUNTER_FLIP_VIDEO",
        "COUNTER_UPDATE_INTERVAL_SECS",
        "COUNTER_STREAM_ADDR",
        "COUNTER_LABEL_FONT",
        "COUNTER_TRACK_EVICTION_FRAMES",
        "COUNTER_RESTART_FAILED",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "backend": {
            "url": "http://backend.internal:5000",
            "auth_token": "file-token",
            "update_timeout_secs": 4
        },
        "videos_dir": "/srv/videos",
        "detector": "stub",
        "update_interval_secs": 30,
        "stream": {
            "addr": "127.0.0.1:7001",
            "jpeg_quality": 70
        },
        "track_eviction_frames": 0,
        "restart": {
            "initial_backoff_secs": 2,
            "max_backoff_secs": 60
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("COUNTER_CONFIG", file.path());
    std::env::set_var("COUNTER_AUTH_TOKEN", "env-token");
    std::env::set_var("COUNTER_FLIP_VIDEO", "yes");
    std::env::set_var("COUNTER_UPDATE_INTERVAL_SECS", "15");

    let cfg = CounterdConfig::load().expect("load config");

    assert_eq!(cfg.backend.url, "http://backend.internal:5000");
    assert_eq!(cfg.backend.auth_token.as_deref(), Some("env-token"));
    assert_eq!(cfg.backend.control_timeout, Duration::from_secs(3));
    assert_eq!(cfg.backend.update_timeout, Duration::from_secs(4));
    assert_eq!(cfg.videos_dir, PathBuf::from("/srv/videos"));
    assert_eq!(cfg.detector, "stub");
    assert!(cfg.flip_video);
    assert_eq!(cfg.update_interval, Duration::from_secs(15));
    assert_eq!(cfg.stream.addr, "127.0.0.1:7001");
    assert_eq!(cfg.stream.jpeg_quality, 70);
    assert_eq!(cfg.stream.max_width, 1280);
    assert_eq!(cfg.track_eviction_frames, None);
    assert_eq!(
        cfg.restart_policy(),
        RestartPolicy::Backoff {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(60),
        }
    );

    let supervisor = cfg.supervisor_config().expect("supervisor config");
    assert_eq!(supervisor.worker.report_interval, Duration::from_secs(15));
    assert!(supervisor.worker.flip_horizontal);
    assert_eq!(supervisor.poll_interval, Duration::from_secs(2));

    clear_env();
}

#[test]
fn loads_toml_config_and_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
videos_dir = "clips"
flip_video = true

[restart]
enabled = false
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("COUNTER_TRACK_EVICTION_FRAMES", "120");

    let cfg = CounterdConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.backend.url, "http://localhost:5000");
    assert_eq!(cfg.backend.auth_token, None);
    assert_eq!(cfg.videos_dir, PathBuf::from("clips"));
    assert_eq!(cfg.detector, "cpu");
    assert!(cfg.flip_video);
    assert_eq!(cfg.update_interval, Duration::from_secs(10));
    assert_eq!(cfg.stream.addr, "0.0.0.0:5001");
    assert_eq!(cfg.track_eviction_frames, Some(120));
    assert_eq!(cfg.restart_policy(), RestartPolicy::Never);

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (key, value) in [
        ("COUNTER_BACKEND_URL", "ftp://backend"),
        ("COUNTER_BACKEND_URL", "not a url"),
        ("COUNTER_UPDATE_INTERVAL_SECS", "0"),
        ("COUNTER_UPDATE_INTERVAL_SECS", "ten"),
        ("COUNTER_FLIP_VIDEO", "sometimes"),
        ("COUNTER_STREAM_ADDR", "localhost"),
        ("COUNTER_TRACK_EVICTION_FRAMES", "-1"),
    ] {
        std::env::set_var(key, value);
        assert!(
            CounterdConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
        std::env::remove_var(key);
    }

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"stream": {"jpeg_quality": 0}}"#)
        .expect("write config");
    assert!(CounterdConfig::load_from(Some(file.path())).is_err());
    assert!(CounterdConfig::load_from(Some(std::path::Path::new("/nonexistent/counter.json"))).is_err());

    clear_env();
}

#[test]
fn missing_label_font_fails_supervisor_setup() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("COUNTER_LABEL_FONT", "/nonexistent/font.ttf");
    let cfg = CounterdConfig::load().expect("load config");
    assert!(cfg.supervisor_config().is_err());

    clear_env();
}
