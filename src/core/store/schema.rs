//! §6.2 persisted schema, applied by the binary's migration step at
//! startup (no external migration runner is assumed).

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS buckets (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS files (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    bucketname TEXT NOT NULL,
    filetype TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS jobs (
    id BIGSERIAL PRIMARY KEY,
    uid UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    output_version SMALLINT NOT NULL DEFAULT 0,
    input TEXT NOT NULL DEFAULT '',
    output JSONB,
    action JSONB NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'queued',
    retries SMALLINT NOT NULL DEFAULT 0,
    error TEXT,
    progress SMALLINT NOT NULL DEFAULT 0
);

-- dequeue() needs the oldest eligible row fast, and the DAG predecessor
-- lookup keyed by (uid, output_version).
CREATE INDEX IF NOT EXISTS jobs_status_created_at_idx ON jobs (status, created_at);
CREATE INDEX IF NOT EXISTS jobs_uid_output_version_idx ON jobs (uid, output_version);

CREATE TABLE IF NOT EXISTS workflows (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    search TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    steps JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow_executions (
    id BIGSERIAL PRIMARY KEY,
    workflow_id BIGINT NOT NULL REFERENCES workflows (id),
    uid UUID NOT NULL,
    progress SMALLINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS downloads (
    id BIGSERIAL PRIMARY KEY,
    external_url TEXT NOT NULL,
    remote_id TEXT,
    title TEXT,
    filename TEXT NOT NULL,
    bucketname TEXT NOT NULL,
    file_id BIGINT REFERENCES files (id),
    quality TEXT NOT NULL,
    format TEXT,
    audio_only BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (external_url, quality, format, audio_only)
);
"#;
