pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id TEXT PRIMARY KEY,
  description TEXT NOT NULL DEFAULT '',
  status TEXT NOT NULL,
  scenario_count INTEGER NOT NULL DEFAULT 0,
  profile_count INTEGER NOT NULL DEFAULT 0,
  total_tests INTEGER NOT NULL DEFAULT 0,
  scope_json TEXT,
  started_at TEXT NOT NULL,
  completed_at TEXT
);

CREATE TABLE IF NOT EXISTS results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id TEXT NOT NULL REFERENCES runs(id),
  scenario_id TEXT NOT NULL,
  scenario_name TEXT NOT NULL DEFAULT '',
  profile_name TEXT NOT NULL,
  provider TEXT NOT NULL DEFAULT '',
  model TEXT NOT NULL DEFAULT '',
  ego_model TEXT,
  superego_model TEXT,
  recognition INTEGER NOT NULL DEFAULT 0,
  multi_agent_tutor INTEGER NOT NULL DEFAULT 0,
  multi_agent_learner INTEGER NOT NULL DEFAULT 0,
  repetition INTEGER NOT NULL DEFAULT 0,
  success INTEGER NOT NULL DEFAULT 0,
  latency_ms INTEGER,
  input_tokens INTEGER,
  output_tokens INTEGER,
  overall_score REAL,
  base_score REAL,
  recognition_score REAL,
  scoring_method TEXT NOT NULL DEFAULT 'judge_failed',
  passes_required INTEGER,
  passes_forbidden INTEGER,
  turn_count INTEGER NOT NULL DEFAULT 1,
  all_turns_passed INTEGER,
  error TEXT,
  judge_model TEXT,
  suggestions_json TEXT,
  details_json TEXT,
  rejudged_from INTEGER REFERENCES results(id),
  created_at TEXT NOT NULL
);
"#;
