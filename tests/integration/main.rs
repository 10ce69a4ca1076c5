//! Integration tests for objstash

mod engine;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use objstash::engine::{Engine, EngineOptions, LookupOutcome};
    use objstash::hash::{hash_bytes, HashAlgorithm};
    use objstash::storage::CacheKey;
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const ENV_VARS: [&str; 10] = [
        "OBJSTASH_DIR",
        "OBJSTASH_MAXSIZE",
        "OBJSTASH_MAXFILES",
        "OBJSTASH_NLEVELS",
        "OBJSTASH_LIMIT_MULTIPLE",
        "OBJSTASH_READONLY",
        "OBJSTASH_COMPRESS",
        "OBJSTASH_COMPRESSLEVEL",
        "OBJSTASH_SECONDARY",
        "OBJSTASH_DIRECT",
    ];

    /// Isolated config file and cache directory
    struct Sandbox {
        tmp: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            Self {
                tmp: TempDir::new().unwrap(),
            }
        }

        fn config_path(&self) -> PathBuf {
            self.tmp.path().join("config.toml")
        }

        fn cache_dir(&self) -> PathBuf {
            self.tmp.path().join("cache")
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("objstash");
            for var in ENV_VARS {
                cmd.env_remove(var);
            }
            cmd.env("OBJSTASH_CONFIG", self.config_path())
                .env("OBJSTASH_DIR", self.cache_dir())
                .env_remove("RUST_LOG")
                .env("CI", "1");
            cmd
        }

        /// Store one entry through the library, returning the manifest path
        fn populate(&self, source: &[u8]) -> PathBuf {
            let mut engine = Engine::new(EngineOptions::new(self.cache_dir())).unwrap();
            let inputs = engine
                .inputs()
                .compiler("cc")
                .source(&hash_bytes(HashAlgorithm::Xxh3, source));
            let LookupOutcome::Miss(token) = engine.lookup(&inputs) else {
                panic!("fresh cache should miss");
            };
            engine.store(token, b"object file", vec![]).unwrap();
            engine
                .local()
                .path_for(&CacheKey::manifest(inputs.class_digest()))
        }
    }

    fn count_entries(dir: &Path) -> usize {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy();
                name.ends_with('M') || name.ends_with('R')
            })
            .count()
    }

    #[test]
    fn help_displays() {
        Sandbox::new()
            .cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("compiler output cache"));
    }

    #[test]
    fn version_displays() {
        Sandbox::new()
            .cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("objstash"));
    }

    #[test]
    fn config_path_follows_environment() {
        let sb = Sandbox::new();
        sb.cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(sb.config_path().to_string_lossy()));
    }

    #[test]
    fn config_show_includes_overrides() {
        let sb = Sandbox::new();
        sb.cmd()
            .args(["config", "show"])
            .env("OBJSTASH_MAXSIZE", "3G")
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]"))
            .stdout(predicate::str::contains("max_size = \"3G\""))
            .stdout(predicate::str::contains(sb.cache_dir().to_string_lossy()));
    }

    #[test]
    fn config_set_persists() {
        let sb = Sandbox::new();
        sb.cmd()
            .args(["config", "set", "cache.max_files", "1000"])
            .assert()
            .success();
        let text = std::fs::read_to_string(sb.config_path()).unwrap();
        assert!(text.contains("max_files = 1000"));

        sb.cmd()
            .args(["config", "set", "cache.no_such_key", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown configuration key"));
    }

    #[test]
    fn broken_config_is_reported_but_repairable() {
        let sb = Sandbox::new();
        std::fs::write(sb.config_path(), "[cache]\nlevels = 12\n").unwrap();

        sb.cmd()
            .arg("stats")
            .assert()
            .failure()
            .stderr(predicate::str::contains("cache.levels"))
            .stderr(predicate::str::contains("Hint:"));

        sb.cmd()
            .args(["config", "set", "cache.levels", "3"])
            .assert()
            .success();
        sb.cmd().arg("stats").assert().success();
    }

    #[test]
    fn stats_on_empty_cache() {
        Sandbox::new()
            .cmd()
            .arg("stats")
            .assert()
            .success()
            .stdout(predicate::str::contains("Local hits"))
            .stdout(predicate::str::contains("Misses"));
    }

    #[test]
    fn stats_json_reflects_activity() {
        let sb = Sandbox::new();
        sb.populate(b"int a;");

        let output = sb.cmd().args(["stats", "--format", "json"]).output().unwrap();
        assert!(output.status.success());
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(json["counters"]["miss"], 1);
        assert_eq!(json["files"], 2);
        assert_eq!(json["cache_dir"], sb.cache_dir().to_string_lossy().as_ref());
    }

    #[test]
    fn zero_stats_resets_counters() {
        let sb = Sandbox::new();
        sb.populate(b"int a;");
        sb.cmd().arg("zero-stats").assert().success();

        let output = sb.cmd().args(["stats", "--format", "json"]).output().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(json["counters"]["miss"], 0);
        assert_eq!(json["files"], 2);
        assert!(json["zeroed_at"].is_string());
    }

    #[test]
    fn hash_file_from_stdin_and_path() {
        let sb = Sandbox::new();
        let expected = hash_bytes(HashAlgorithm::Xxh3, b"hello").to_string();
        sb.cmd()
            .args(["hash-file", "-"])
            .write_stdin("hello")
            .assert()
            .success()
            .stdout(format!("{expected}\n"));

        let file = sb.tmp.path().join("input.c");
        std::fs::write(&file, "hello").unwrap();
        let expected = hash_bytes(HashAlgorithm::Sha256, b"hello").to_string();
        sb.cmd()
            .args(["hash-file", "--algorithm", "sha256"])
            .arg(&file)
            .assert()
            .success()
            .stdout(format!("{expected}\n"));
    }

    #[test]
    fn hash_file_missing_path_fails() {
        let sb = Sandbox::new();
        sb.cmd()
            .args(["hash-file"])
            .arg(sb.tmp.path().join("missing.c"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn dump_manifest_lists_entries() {
        let sb = Sandbox::new();
        let manifest = sb.populate(b"int b;");
        sb.cmd()
            .arg("dump-manifest")
            .arg(&manifest)
            .assert()
            .success()
            .stdout(predicate::str::contains("Entries: 1"));

        let junk = sb.tmp.path().join("junk");
        std::fs::write(&junk, b"not a manifest").unwrap();
        sb.cmd()
            .arg("dump-manifest")
            .arg(&junk)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Corrupt cache data"));
    }

    #[test]
    fn clear_requires_confirmation() {
        let sb = Sandbox::new();
        sb.populate(b"int c;");

        sb.cmd()
            .arg("clear")
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing removed"));
        assert_eq!(count_entries(&sb.cache_dir()), 2);

        sb.cmd()
            .args(["clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cache cleared"));
        assert_eq!(count_entries(&sb.cache_dir()), 0);
    }

    #[test]
    fn evict_older_than_keeps_recent_entries() {
        let sb = Sandbox::new();
        sb.populate(b"int d;");
        sb.cmd()
            .args(["evict-older-than", "1d"])
            .assert()
            .success();
        assert_eq!(count_entries(&sb.cache_dir()), 2);

        sb.cmd()
            .args(["evict-older-than", "soon"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid duration"));
    }

    #[test]
    fn cleanup_enforces_file_limit() {
        let sb = Sandbox::new();
        for i in 0..8u8 {
            sb.populate(&[i]);
        }
        assert_eq!(count_entries(&sb.cache_dir()), 16);

        sb.cmd()
            .arg("cleanup")
            .env("OBJSTASH_MAXFILES", "10")
            .assert()
            .success()
            .stdout(predicate::str::contains("Cleanup done"));
        // Trimmed to limit_multiple (0.8) of the ceiling
        assert!(count_entries(&sb.cache_dir()) <= 8);
    }

    #[test]
    fn completions_generate() {
        Sandbox::new()
            .cmd()
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("objstash"));
    }

    fn result_files(dir: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name().to_string_lossy().ends_with('R'))
            .map(|e| e.into_path())
            .collect()
    }

    fn compression_json(sb: &Sandbox) -> serde_json::Value {
        let output = sb
            .cmd()
            .args(["show-compression", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        serde_json::from_slice(&output.stdout).unwrap()
    }

    #[test]
    fn show_compression_reports_results() {
        let sb = Sandbox::new();
        sb.populate(b"int e;");
        sb.populate(b"int f;");

        let json = compression_json(&sb);
        assert_eq!(json["results"], 2);
        assert_eq!(json["compressed"], 2);
        assert_eq!(json["uncompressed"], 0);
        assert_eq!(json["original_bytes"], 2 * b"object file".len() as u64);

        sb.cmd()
            .arg("show-compression")
            .assert()
            .success()
            .stdout(predicate::str::contains("Compression ratio"));
    }

    #[test]
    fn recompress_rewrites_every_result() {
        let sb = Sandbox::new();
        sb.populate(b"int g;");

        sb.cmd()
            .args(["recompress", "uncompressed"])
            .assert()
            .success()
            .stdout(predicate::str::contains("rewrote 1 of 1 results"));
        let json = compression_json(&sb);
        assert_eq!(json["compressed"], 0);
        assert_eq!(json["uncompressed"], 1);

        sb.cmd()
            .args(["recompress", "-3"])
            .assert()
            .success();
        assert_eq!(compression_json(&sb)["compressed"], 1);

        sb.cmd()
            .args(["recompress", "fast"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("compression level"));
    }

    #[test]
    fn extract_result_decodes_stored_output() {
        let sb = Sandbox::new();
        sb.populate(b"int h;");
        let results = result_files(&sb.cache_dir());
        assert_eq!(results.len(), 1);

        sb.cmd()
            .arg("extract-result")
            .arg(&results[0])
            .assert()
            .success()
            .stdout("object file");

        let out = sb.tmp.path().join("out/h.o");
        sb.cmd()
            .arg("extract-result")
            .arg(&results[0])
            .arg("--output")
            .arg(&out)
            .assert()
            .success();
        assert_eq!(std::fs::read(&out).unwrap(), b"object file");

        let junk = sb.tmp.path().join("junkR");
        std::fs::write(&junk, b"\x01").unwrap();
        sb.cmd()
            .arg("extract-result")
            .arg(&junk)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Corrupt cache data"));
    }
}
