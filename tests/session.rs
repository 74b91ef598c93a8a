use anyhow::Result;
use filepipe::config::Config;
use filepipe::session::{DiffRequest, SessionManager};
use git2::{Repository, Signature};
use std::fs;
use tempfile::TempDir;

// Nothing listens here; sessions must come up anyway and serve local state.
const DEAD_SIGNALING: &str = "ws://127.0.0.1:9";

fn parse_config(json: &str) -> Config {
    serde_json::from_str(json).unwrap()
}

fn commit_all(repo: &Repository, message: &str) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("test", "test@example.dev").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<_> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap();
}

#[tokio::test]
async fn sessions_get_distinct_urls_and_manager_aggregation() -> Result<()> {
    let root = TempDir::new()?;
    let config = parse_config(
        r#"{"signalingServer":"ws://127.0.0.1:9",
            "interfaces":[
              {"name":"editor","host":"https://pipe.example.dev/editor","files":["*.yml rw"]},
              {"name":"board","host":"https://pipe.example.dev/board","files":["*.yml r"]},
              {"name":"hub","host":"https://pipe.example.dev/hub","files":["** r"],"manager":true}
            ]}"#,
    );

    let manager = SessionManager::start(
        root.path(),
        DEAD_SIGNALING,
        config.interfaces()?,
        None,
    )
    .await?;

    let sessions = manager.sessions();
    assert_eq!(sessions.len(), 3);

    // Every session gets its own channel identifier.
    let pipes: Vec<&str> = sessions
        .iter()
        .map(|s| s.url.split("pipe=").nth(1).unwrap().split('&').next().unwrap())
        .collect();
    assert_ne!(pipes[0], pipes[1]);
    assert_ne!(pipes[1], pipes[2]);

    // The manager session enumerates the non-manager ones by name.
    let hub = sessions.iter().find(|s| s.manager).unwrap();
    let editor = sessions.iter().find(|s| s.name == "editor").unwrap();
    let board = sessions.iter().find(|s| s.name == "board").unwrap();
    assert_eq!(hub.doc().get_metadata("editor").as_deref(), Some(&*editor.url));
    assert_eq!(hub.doc().get_metadata("board").as_deref(), Some(&*board.url));
    assert_eq!(hub.doc().get_metadata("hub"), None);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn diff_mode_populates_base_and_head_maps() -> Result<()> {
    let root = TempDir::new()?;
    let repo = Repository::init(root.path())?;
    {
        let mut config = repo.config()?;
        config.set_str("user.name", "test")?;
        config.set_str("user.email", "test@example.dev")?;
    }
    fs::write(root.path().join("api.yml"), "version: 1\n")?;
    commit_all(&repo, "initial");
    let base = repo.head()?.shorthand().unwrap().to_string();

    // One uncommitted edit relative to the branch tip.
    fs::write(root.path().join("api.yml"), "version: 2\n")?;

    let config = parse_config(
        r#"{"signalingServer":"ws://127.0.0.1:9",
            "interfaces":[{"name":"review","host":"https://pipe.example.dev/review",
                           "files":["*.yml r"]}]}"#,
    );
    let request = DiffRequest {
        base_ref: base.clone(),
    };
    let manager = SessionManager::start(
        root.path(),
        DEAD_SIGNALING,
        config.interfaces()?,
        Some(&request),
    )
    .await?;

    let session = &manager.sessions()[0];
    assert!(session.url.contains("mode=diff"));
    assert_eq!(
        session.doc().get_base_file("api.yml").as_deref(),
        Some("version: 1\n")
    );
    assert_eq!(
        session.doc().get_head_file("api.yml").as_deref(),
        Some("version: 2\n")
    );
    assert_eq!(session.doc().get_file("api.yml"), None);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn diff_mode_without_a_repository_is_fatal() -> Result<()> {
    let root = TempDir::new()?;
    let config = parse_config(
        r#"{"signalingServer":"ws://127.0.0.1:9",
            "interfaces":[{"name":"review","host":"https://pipe.example.dev/review",
                           "files":["*.yml r"]}]}"#,
    );
    let request = DiffRequest {
        base_ref: "main".into(),
    };
    let result = SessionManager::start(
        root.path(),
        DEAD_SIGNALING,
        config.interfaces()?,
        Some(&request),
    )
    .await;
    assert!(result.is_err());
    Ok(())
}
