//! Storage layout and deploy directory tests

use stevedore::filesys::file::File;
use stevedore::storage::layout::{StorageLayout, STAGING_DIR_NAME};

use tempfile::tempdir;

#[test]
fn layout_paths_hang_off_the_root() {
    let layout = StorageLayout::new("/srv/app");

    assert_eq!(
        layout.config_file().path().to_str().unwrap(),
        "/srv/app/config.json"
    );
    assert_eq!(
        layout.deploys_dir().path().to_str().unwrap(),
        "/srv/app/deploys"
    );
    assert_eq!(
        layout
            .deploy_dir("amber-oslo-2026-08-02-10-00-00")
            .path()
            .to_str()
            .unwrap(),
        "/srv/app/deploys/amber-oslo-2026-08-02-10-00-00"
    );
    assert_eq!(
        layout
            .deploy_config_file("amber-oslo-2026-08-02-10-00-00")
            .path()
            .to_str()
            .unwrap(),
        "/srv/app/deploys/amber-oslo-2026-08-02-10-00-00/deploy.json"
    );
    assert_eq!(
        layout
            .pid_override_file("amber-oslo-2026-08-02-10-00-00")
            .path()
            .to_str()
            .unwrap(),
        "/srv/app/deploys/amber-oslo-2026-08-02-10-00-00/PID_FILE"
    );
    assert_eq!(
        layout.haproxy_config_file().path().to_str().unwrap(),
        "/srv/app/haproxy.cfg"
    );
    assert_eq!(
        layout.haproxy_pid_file().path().to_str().unwrap(),
        "/srv/app/haproxy.pid"
    );
}

#[tokio::test]
async fn setup_creates_the_deploys_dir() {
    let dir = tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());

    layout.setup().await.unwrap();
    assert!(layout.deploys_dir().exists().await);
}

#[tokio::test]
async fn deploy_ids_exclude_the_staging_dir() {
    let dir = tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    layout.setup().await.unwrap();

    layout.deploy_dir("brave-kyoto-2026-08-02-10-00-00").create().await.unwrap();
    layout.deploy_dir("calm-riga-2026-08-02-10-00-01").create().await.unwrap();
    layout.staging_dir().create().await.unwrap();

    let ids = layout.read_deploy_ids().await.unwrap();
    assert_eq!(
        ids,
        vec![
            "brave-kyoto-2026-08-02-10-00-00".to_string(),
            "calm-riga-2026-08-02-10-00-01".to_string(),
        ]
    );
    assert!(!ids.iter().any(|id| id == STAGING_DIR_NAME));
}

#[tokio::test]
async fn atomic_write_replaces_contents() {
    let dir = tempdir().unwrap();
    let file = File::new(dir.path().join("config.json"));

    file.write_atomic(b"first").await.unwrap();
    assert_eq!(file.read_string().await.unwrap(), "first");

    file.write_atomic(b"second").await.unwrap();
    assert_eq!(file.read_string().await.unwrap(), "second");
}
