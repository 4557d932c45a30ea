pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS prs (
  number INTEGER PRIMARY KEY,
  merged_at TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('success','failure','neutral','unknown'))
);

CREATE TABLE IF NOT EXISTS test_blueprints (
  id INTEGER PRIMARY KEY,
  title TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS test_run_blueprints (
  id INTEGER PRIMARY KEY,
  test_blueprint_ids BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS test_runs (
  source TEXT NOT NULL CHECK (source IN ('appveyor','circleci')),
  ext_id INTEGER NOT NULL,
  blueprint_id INTEGER NOT NULL REFERENCES test_run_blueprints(id),
  timestamp TEXT NOT NULL,
  branch TEXT,
  commit_id BLOB NOT NULL,
  result_spec BLOB,
  PRIMARY KEY (source, ext_id)
);

CREATE TABLE IF NOT EXISTS test_flakes (
  test_run_source TEXT NOT NULL CHECK (test_run_source IN ('appveyor','circleci')),
  test_run_ext_id INTEGER NOT NULL,
  test_blueprint_id INTEGER NOT NULL REFERENCES test_blueprints(id),
  PRIMARY KEY (test_run_source, test_run_ext_id, test_blueprint_id),
  FOREIGN KEY (test_run_source, test_run_ext_id) REFERENCES test_runs(source, ext_id)
);

CREATE INDEX IF NOT EXISTS idx_test_runs_timestamp ON test_runs(timestamp);
CREATE INDEX IF NOT EXISTS idx_test_runs_rerun ON test_runs(blueprint_id, commit_id, timestamp);
"#;
