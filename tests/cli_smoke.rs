use std::path::PathBuf;

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_statcast")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "statcast.exe"
            } else {
                "statcast"
            });
            p
        })
}

#[test]
fn cli_frame_writes_png_without_fetching() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();

    let config_path = dir.join("config.json");
    let out_path = dir.join("out.png");
    let _ = std::fs::remove_file(&out_path);
    std::fs::write(&config_path, r#"{"width": 640, "height": 360}"#).unwrap();

    let status = std::process::Command::new(exe())
        .args(["frame", "--no-fetch", "--config"])
        .arg(&config_path)
        .arg("--out")
        .arg(&out_path)
        .status()
        .unwrap();

    assert!(status.success());
    let img = image::open(&out_path).unwrap();
    assert_eq!((img.width(), img.height()), (640, 360));
}

#[test]
fn cli_stream_rejects_missing_stream_key() {
    let status = std::process::Command::new(exe())
        .args(["stream", "--channel-id", "c", "--stream-id", "s"])
        .env_remove("STATCAST_STREAM_KEY")
        .status()
        .unwrap();
    assert!(!status.success());
}
