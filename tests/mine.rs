use std::path::Path;
use std::process::Command;

use git2::{Repository, Signature, Time};

fn repo_with_history(dir: &Path) {
    let repo = Repository::init(dir).unwrap();
    let mut parent = None;
    for (i, (path, content, who)) in [
        ("src/lib.rs", "fn a() {}\nfn b() {}\n", "alice"),
        ("src/lib.rs", "fn a() {}\nfn c() {}\n", "bob"),
        ("README.md", "# demo\n", "alice"),
    ]
    .into_iter()
    .enumerate()
    {
        let full = dir.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(path)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::new(
            who,
            &format!("{who}@example.com"),
            &Time::new(1_700_000_000 + i as i64 * 86_400, 0),
        )
        .unwrap();
        let parents: Vec<git2::Commit> = parent
            .map(|id| repo.find_commit(id).unwrap())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        parent = Some(
            repo.commit(Some("HEAD"), &sig, &sig, "change", &tree, &parent_refs)
                .unwrap(),
        );
    }
}

fn histmine(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_histmine"))
        .args(args)
        .current_dir(cwd)
        .output()
        .unwrap()
}

#[test]
fn mine_writes_json_report_and_cache() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    repo_with_history(&repo);
    let db = dir.path().join("cache.db");

    let output = histmine(
        dir.path(),
        &[
            "mine",
            "--path",
            repo.to_str().unwrap(),
            "--project",
            "demo",
            "--db",
            db.to_str().unwrap(),
            "--format",
            "json",
        ],
    );
    assert!(output.status.success(), "histmine mine failed: {}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["summary"]["commitsProcessed"], 3);
    assert_eq!(json["metrics"].as_array().unwrap().len(), 3);
    assert_eq!(json["ownership"]["project"], "demo");
    assert!(json["developers"].as_array().unwrap().len() >= 2);
    assert!(db.exists());

    let again = histmine(
        dir.path(),
        &[
            "mine",
            "--path",
            repo.to_str().unwrap(),
            "--project",
            "demo",
            "--db",
            db.to_str().unwrap(),
            "--format",
            "json",
        ],
    );
    assert!(again.status.success());
    let json: serde_json::Value = serde_json::from_slice(&again.stdout).unwrap();
    assert_eq!(json["summary"]["commitsCached"], 3);
    assert_eq!(json["summary"]["filesBlamed"], 0);
}

#[test]
fn ownership_reads_cached_blame() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    repo_with_history(&repo);
    let db = dir.path().join("cache.db");

    let mined = histmine(
        dir.path(),
        &["mine", "--path", repo.to_str().unwrap(), "--project", "demo", "--db", db.to_str().unwrap()],
    );
    assert!(mined.status.success(), "{}", String::from_utf8_lossy(&mined.stderr));

    let output = histmine(
        dir.path(),
        &[
            "ownership",
            "--project",
            "demo",
            "--db",
            db.to_str().unwrap(),
            "--package",
            "src",
            "--format",
            "json",
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["package"]["lineCount"], 2);
    assert_eq!(json["package"]["perAuthor"]["alice@example.com"]["lineCount"], 1);
    assert_eq!(json["package"]["perAuthor"]["bob@example.com"]["lineCount"], 1);
    assert_eq!(json["files"][0]["path"], "src/lib.rs");
}

/// Commit the working tree state of `files`; `None` removes the file.
fn commit_files(repo: &Repository, files: &[(&str, Option<&str>)], when: i64) {
    let workdir = repo.workdir().unwrap();
    let mut index = repo.index().unwrap();
    for (path, content) in files {
        match content {
            Some(content) => {
                std::fs::write(workdir.join(path), content).unwrap();
                index.add_path(Path::new(path)).unwrap();
            }
            None => {
                std::fs::remove_file(workdir.join(path)).unwrap();
                index.remove_path(Path::new(path)).unwrap();
            }
        }
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::new("alice", "alice@example.com", &Time::new(when, 0)).unwrap();
    let parents: Vec<git2::Commit> = repo
        .head()
        .ok()
        .map(|head| head.peel_to_commit().unwrap())
        .into_iter()
        .collect();
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, "change", &tree, &parent_refs)
        .unwrap();
}

#[test]
fn ownership_forgets_deleted_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repo");
    let repo = Repository::init(&path).unwrap();
    let db = dir.path().join("cache.db");
    let mine = || {
        let output = histmine(
            dir.path(),
            &["mine", "--path", path.to_str().unwrap(), "--project", "demo", "--db", db.to_str().unwrap()],
        );
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    };

    commit_files(
        &repo,
        &[("a.txt", Some("one\ntwo\n")), ("b.txt", Some("x\ny\nz\n"))],
        1_700_000_000,
    );
    mine();
    commit_files(&repo, &[("b.txt", None)], 1_700_086_400);
    mine();

    let output = histmine(
        dir.path(),
        &["ownership", "--project", "demo", "--db", db.to_str().unwrap(), "--format", "json"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["package"]["lineCount"], 2);
    let files: Vec<&str> = json["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    assert_eq!(files, vec!["a.txt"]);
}

#[test]
fn mine_outside_a_repository_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = histmine(dir.path(), &["mine", "--path", "."]);
    assert!(!output.status.success());
}
