//! Redis-backed queue backend for production use.
//!
//! Layout, with `{p}` the configured key prefix wrapped in a hash tag:
//!
//! - `{p}:job:{id}` hash record, expiry refreshed on every write
//! - `{p}:jobs:pending|processing|completed|failed` sorted sets of job ids
//! - `{p}:jobs:seq` enqueue sequence used to break priority ties
//! - `{p}:metrics:{name}` lifetime counters and `{p}:metrics:{name}:{date}`
//!   daily counters kept for 30 days
//!
//! A record hash holds the serialized job under `job` plus the fields the
//! scripts rewrite on their own: `status`, `attempt` and `started_at`. Those
//! three override the copies inside `job`, so no script ever decodes or
//! re-encodes the JSON.
//!
//! Every compound transition is a single Lua script, so an index move and
//! the record write it goes with are applied together or not at all. The
//! dequeue script builds record keys from popped ids rather than `KEYS`;
//! the shared hash tag keeps them in the same cluster slot as the indices.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::job::{Job, JobId, JobStatus, Lease};
use super::queue::{QueueBackend, QueueStats, QueueTotals};
use super::retry::{retry_transient, BackoffStrategy};
use crate::config::RedisConfig;
use crate::error::{ErrorCode, MdusError, Result};

/// Daily counters outlive their day by this long.
const DAILY_METRIC_TTL_SECS: u64 = 30 * 24 * 3600;

/// Sequence numbers stay below this, keeping pending scores exact in a double.
const SEQ_SPAN: &str = "1099511627776";

/// Hash fields in the order `HMGET` reads them back.
const RECORD_FIELDS: [&str; 4] = ["job", "status", "attempt", "started_at"];

// ═══════════════════════════════════════════════════════════════════════════════
// Lua Scripts
// ═══════════════════════════════════════════════════════════════════════════════

/// KEYS: record, pending, seq, total, daily
/// ARGV: id, job json, status, attempt, started_at, ttl, priority, daily ttl, seq span
const ENQUEUE_LUA: &str = r#"
local seq = redis.call('INCR', KEYS[3])
local score = -tonumber(ARGV[7]) * tonumber(ARGV[9]) + seq
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], 'job', ARGV[2], 'status', ARGV[3], 'attempt', ARGV[4], 'started_at', ARGV[5])
redis.call('EXPIRE', KEYS[1], ARGV[6])
redis.call('ZADD', KEYS[2], string.format('%.0f', score), ARGV[1])
redis.call('INCR', KEYS[4])
redis.call('INCR', KEYS[5])
redis.call('EXPIRE', KEYS[5], ARGV[8])
return seq
"#;

/// KEYS: pending, processing
/// ARGV: record key prefix, now ms, now rfc3339, ttl
///
/// Pending ids whose record has expired are dropped, up to 64 per call.
const DEQUEUE_LUA: &str = r#"
for _ = 1, 64 do
  local head = redis.call('ZRANGE', KEYS[1], 0, 0)
  if #head == 0 then
    return false
  end
  local id = head[1]
  redis.call('ZREM', KEYS[1], id)
  local key = ARGV[1] .. id
  local attempt = redis.call('HGET', key, 'attempt')
  if attempt then
    local next_attempt = string.format('%d', (tonumber(attempt) or 0) + 1)
    redis.call('HSET', key, 'status', 'processing', 'attempt', next_attempt, 'started_at', ARGV[3])
    redis.call('EXPIRE', key, ARGV[4])
    redis.call('ZADD', KEYS[2], ARGV[2], id)
    return redis.call('HMGET', key, 'job', 'status', 'attempt', 'started_at')
  end
end
return false
"#;

/// Shared fence: -1 record gone (entry evicted), 0 lease mismatch.
///
/// ARGV: id, attempt, target status, replay flag. A replayed call whose
/// first send already landed finds the record at the target status under
/// the same attempt and reports success without writing again.
const FENCE_LUA: &str = r#"
local current = redis.call('HMGET', KEYS[1], 'status', 'attempt')
if not current[1] then
  redis.call('ZREM', KEYS[2], ARGV[1])
  return -1
end
if tonumber(current[2]) ~= tonumber(ARGV[2]) then
  return 0
end
if current[1] ~= 'processing' then
  if ARGV[4] == '1' and current[1] == ARGV[3] then
    return 1
  end
  return 0
end
"#;

/// KEYS: record, processing, target index, total, daily
/// ARGV: id, attempt, status, replay, job json, started_at, ttl, target score, daily ttl
const FINISH_LUA: &str = r#"
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[8], ARGV[1])
redis.call('HSET', KEYS[1], 'job', ARGV[5], 'status', ARGV[3], 'attempt', ARGV[2], 'started_at', ARGV[6])
redis.call('EXPIRE', KEYS[1], ARGV[7])
redis.call('INCR', KEYS[4])
redis.call('INCR', KEYS[5])
redis.call('EXPIRE', KEYS[5], ARGV[9])
return 1
"#;

/// KEYS: record, processing, pending, seq
/// ARGV: id, attempt, status, replay, job json, started_at, ttl, priority, seq span
const REQUEUE_LUA: &str = r#"
local seq = redis.call('INCR', KEYS[4])
local score = -tonumber(ARGV[8]) * tonumber(ARGV[9]) + seq
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], string.format('%.0f', score), ARGV[1])
redis.call('HSET', KEYS[1], 'job', ARGV[5], 'status', ARGV[3], 'attempt', ARGV[2], 'started_at', ARGV[6])
redis.call('EXPIRE', KEYS[1], ARGV[7])
return 1
"#;

/// KEYS: record, completed, failed
/// ARGV: id
const PURGE_LUA: &str = r#"
local in_completed = redis.call('ZSCORE', KEYS[2], ARGV[1])
local in_failed = redis.call('ZSCORE', KEYS[3], ARGV[1])
if not in_completed and not in_failed then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('DEL', KEYS[1])
return 1
"#;

struct Scripts {
    enqueue: Script,
    dequeue: Script,
    finish: Script,
    requeue: Script,
    purge: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE_LUA),
            dequeue: Script::new(DEQUEUE_LUA),
            finish: Script::new(&format!("{}{}", FENCE_LUA, FINISH_LUA)),
            requeue: Script::new(&format!("{}{}", FENCE_LUA, REQUEUE_LUA)),
            purge: Script::new(PURGE_LUA),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Keys
// ═══════════════════════════════════════════════════════════════════════════════

struct Keys {
    record_prefix: String,
    pending: String,
    processing: String,
    completed: String,
    failed: String,
    seq: String,
    metrics_prefix: String,
}

impl Keys {
    fn new(prefix: &str) -> Self {
        let tag = format!("{{{}}}", prefix);
        Self {
            record_prefix: format!("{}:job:", tag),
            pending: format!("{}:jobs:pending", tag),
            processing: format!("{}:jobs:processing", tag),
            completed: format!("{}:jobs:completed", tag),
            failed: format!("{}:jobs:failed", tag),
            seq: format!("{}:jobs:seq", tag),
            metrics_prefix: format!("{}:metrics:", tag),
        }
    }

    fn record(&self, id: JobId) -> String {
        format!("{}{}", self.record_prefix, id)
    }

    fn metric(&self, name: &str) -> String {
        format!("{}{}", self.metrics_prefix, name)
    }

    fn daily_metric(&self, name: &str, now: DateTime<Utc>) -> String {
        format!("{}{}:{}", self.metrics_prefix, name, now.format("%Y-%m-%d"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// A job flattened into its hash fields.
struct RecordFields {
    json: String,
    status: &'static str,
    attempt: String,
    started_at: String,
}

impl RecordFields {
    fn of(job: &Job) -> Result<Self> {
        Ok(Self {
            json: serde_json::to_string(job)?,
            status: job.status.as_str(),
            attempt: job.attempt.to_string(),
            started_at: job.started_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        })
    }
}

fn corrupt_field(field: &str, value: &str) -> MdusError {
    MdusError::with_internal(
        ErrorCode::DeserializationError,
        "Corrupt job record",
        format!("field {} holds {:?}", field, value),
    )
}

/// Rebuild a job from `HMGET` of [`RECORD_FIELDS`]; `None` when the record
/// is gone.
fn decode_record(fields: Vec<Option<String>>) -> Result<Option<Job>> {
    let mut fields = fields.into_iter();
    let Some(body) = fields.next().flatten() else {
        return Ok(None);
    };
    let mut job: Job = serde_json::from_str(&body)?;

    if let Some(status) = fields.next().flatten() {
        job.status = serde_json::from_value(serde_json::Value::String(status.clone()))
            .map_err(|_| corrupt_field("status", &status))?;
    }
    if let Some(attempt) = fields.next().flatten() {
        job.attempt = attempt
            .parse()
            .map_err(|_| corrupt_field("attempt", &attempt))?;
    }
    match fields.next().flatten() {
        Some(started) if started.is_empty() => job.started_at = None,
        Some(started) => {
            let parsed = DateTime::parse_from_rfc3339(&started)
                .map_err(|_| corrupt_field("started_at", &started))?;
            job.started_at = Some(parsed.with_timezone(&Utc));
        }
        None => {}
    }
    if job.status == JobStatus::Processing {
        job.completed_at = None;
    }
    Ok(Some(job))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Redis queue backend.
pub struct RedisQueueBackend {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    keys: Keys,
    scripts: Scripts,
    ttl_secs: u64,
    retry_attempts: u32,
    backoff: BackoffStrategy,
}

impl RedisQueueBackend {
    /// Create a new Redis queue backend.
    ///
    /// No connection is made until the first operation.
    pub fn new(client: redis::Client, config: &RedisConfig) -> Self {
        Self {
            client,
            conn: Mutex::new(None),
            keys: Keys::new(&config.key_prefix),
            scripts: Scripts::load(),
            ttl_secs: config.record_ttl.as_secs().max(1),
            retry_attempts: config.retry_attempts,
            backoff: BackoffStrategy::exponential(config.retry_backoff),
        }
    }

    /// Open a client from `config.url` and wrap it.
    pub fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            MdusError::with_internal(
                ErrorCode::InvalidConfiguration,
                "Invalid Redis URL",
                e.to_string(),
            )
        })?;
        Ok(Self::new(client, config))
    }

    /// Shared multiplexed connection, opened on first use.
    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                MdusError::with_internal(
                    ErrorCode::StoreUnavailable,
                    "Failed to get Redis connection for job queue",
                    e.to_string(),
                )
            })?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Run `op` on a connection, retrying transient failures.
    ///
    /// A broken connection is dropped so the next attempt reconnects.
    async fn with_conn<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let op = &op;
        retry_transient(operation, self.retry_attempts, &self.backoff, || async move {
            let conn = self.connection().await?;
            match op(conn).await {
                Ok(value) => Ok(value),
                Err(e) => {
                    if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
                        self.conn.lock().await.take();
                    }
                    Err(MdusError::from(e))
                }
            }
        })
        .await
    }

    /// Apply a fenced transition script and map its status reply.
    ///
    /// `invoke` receives the replay flag: set on every send after the first
    /// (or on all of them when `replaying`), since an earlier send whose
    /// reply was lost may already have applied the transition.
    async fn fenced<F, Fut>(
        &self,
        operation: &'static str,
        lease: &Lease,
        replaying: bool,
        invoke: F,
    ) -> Result<()>
    where
        F: Fn(MultiplexedConnection, bool) -> Fut,
        Fut: Future<Output = redis::RedisResult<i64>>,
    {
        let sent = AtomicBool::new(replaying);
        let (sent, invoke) = (&sent, &invoke);
        let reply = self
            .with_conn(operation, |conn| async move {
                let replay = sent.swap(true, Ordering::SeqCst);
                invoke(conn, replay).await
            })
            .await?;
        match reply {
            1 => Ok(()),
            0 => Err(MdusError::not_in_flight(lease.job_id)),
            _ => Err(MdusError::job_not_found(lease.job_id)),
        }
    }

    async fn finish(
        &self,
        operation: &'static str,
        lease: &Lease,
        job: &Job,
        target: &str,
        metric: &str,
        replaying: bool,
    ) -> Result<()> {
        let now = Utc::now();
        let fields = RecordFields::of(job)?;
        let record = self.keys.record(job.id);
        let total = self.keys.metric(metric);
        let daily = self.keys.daily_metric(metric, now);
        let score = job.completed_at.unwrap_or(now).timestamp_millis();
        let id = job.id.to_string();

        let (fields, record, total, daily, id) = (&fields, &record, &total, &daily, &id);
        self.fenced(operation, lease, replaying, |mut conn, replay| async move {
            self.scripts
                .finish
                .key(record)
                .key(&self.keys.processing)
                .key(target)
                .key(total)
                .key(daily)
                .arg(id)
                .arg(lease.attempt)
                .arg(fields.status)
                .arg(if replay { "1" } else { "0" })
                .arg(&fields.json)
                .arg(&fields.started_at)
                .arg(self.ttl_secs)
                .arg(score)
                .arg(DAILY_METRIC_TTL_SECS)
                .invoke_async::<_, i64>(&mut conn)
                .await
        })
        .await
    }
}

fn parse_ids(raw: Vec<String>) -> Vec<JobId> {
    raw.into_iter()
        .filter_map(|s| match s.parse::<JobId>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(member = %s, "Ignoring malformed job id in index");
                None
            }
        })
        .collect()
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn put(&self, job: &Job) -> Result<()> {
        let fields = RecordFields::of(job)?;
        let key = self.keys.record(job.id);
        let (fields, key) = (&fields, &key);
        self.with_conn("put", |mut conn| async move {
            redis::pipe()
                .atomic()
                .cmd("HSET")
                .arg(key)
                .arg("job")
                .arg(&fields.json)
                .arg("status")
                .arg(fields.status)
                .arg("attempt")
                .arg(&fields.attempt)
                .arg("started_at")
                .arg(&fields.started_at)
                .ignore()
                .cmd("EXPIRE")
                .arg(key)
                .arg(self.ttl_secs)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let key = self.keys.record(id);
        let key = &key;
        let fields: Vec<Option<String>> = self
            .with_conn("get", |mut conn| async move {
                redis::cmd("HMGET")
                    .arg(key)
                    .arg(&RECORD_FIELDS[..])
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        decode_record(fields)
    }

    async fn delete(&self, id: JobId) -> Result<()> {
        let key = self.keys.record(id);
        let key = &key;
        self.with_conn("delete", |mut conn| async move {
            redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn enqueue(&self, job: &Job) -> Result<()> {
        let now = Utc::now();
        let fields = RecordFields::of(job)?;
        let record = self.keys.record(job.id);
        let total = self.keys.metric("jobs_queued");
        let daily = self.keys.daily_metric("jobs_queued", now);
        let id = job.id.to_string();
        let priority = job.priority;

        let (fields, record, total, daily, id) = (&fields, &record, &total, &daily, &id);
        let seq: i64 = self
            .with_conn("enqueue", |mut conn| async move {
                self.scripts
                    .enqueue
                    .key(record)
                    .key(&self.keys.pending)
                    .key(&self.keys.seq)
                    .key(total)
                    .key(daily)
                    .arg(id)
                    .arg(&fields.json)
                    .arg(fields.status)
                    .arg(&fields.attempt)
                    .arg(&fields.started_at)
                    .arg(self.ttl_secs)
                    .arg(priority)
                    .arg(DAILY_METRIC_TTL_SECS)
                    .arg(SEQ_SPAN)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        tracing::debug!(job_id = %job.id, seq, "Job written to pending index");
        Ok(())
    }

    async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let now_ms = now.timestamp_millis();
        let now_str = now.to_rfc3339();
        let now_str = &now_str;

        let fields: Option<Vec<Option<String>>> = self
            .with_conn("dequeue", |mut conn| async move {
                self.scripts
                    .dequeue
                    .key(&self.keys.pending)
                    .key(&self.keys.processing)
                    .arg(&self.keys.record_prefix)
                    .arg(now_ms)
                    .arg(now_str)
                    .arg(self.ttl_secs)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        let job = match fields {
            Some(fields) => decode_record(fields)?,
            None => None,
        };
        if let Some(ref job) = job {
            tracing::debug!(job_id = %job.id, attempt = job.attempt, "Job moved in-flight");
        }
        Ok(job)
    }

    async fn acknowledge_complete(&self, lease: &Lease, job: &Job) -> Result<()> {
        self.finish(
            "acknowledge_complete",
            lease,
            job,
            &self.keys.completed,
            "jobs_completed",
            false,
        )
        .await
    }

    async fn acknowledge_failed(&self, lease: &Lease, job: &Job) -> Result<()> {
        self.finish(
            "acknowledge_failed",
            lease,
            job,
            &self.keys.failed,
            "jobs_failed",
            false,
        )
        .await
    }

    async fn requeue(&self, lease: &Lease, job: &Job) -> Result<()> {
        let fields = RecordFields::of(job)?;
        let record = self.keys.record(job.id);
        let id = job.id.to_string();
        let priority = job.priority;

        let (fields, record, id) = (&fields, &record, &id);
        self.fenced("requeue", lease, false, |mut conn, replay| async move {
            self.scripts
                .requeue
                .key(record)
                .key(&self.keys.processing)
                .key(&self.keys.pending)
                .key(&self.keys.seq)
                .arg(id)
                .arg(lease.attempt)
                .arg(fields.status)
                .arg(if replay { "1" } else { "0" })
                .arg(&fields.json)
                .arg(&fields.started_at)
                .arg(self.ttl_secs)
                .arg(priority)
                .arg(SEQ_SPAN)
                .invoke_async::<_, i64>(&mut conn)
                .await
        })
        .await
    }

    async fn stats(&self) -> Result<QueueStats> {
        let keys = &self.keys;
        let queued = keys.metric("jobs_queued");
        let completed = keys.metric("jobs_completed");
        let failed = keys.metric("jobs_failed");
        let (queued, completed, failed) = (&queued, &completed, &failed);

        #[allow(clippy::type_complexity)]
        let (p, r, c, f, tq, tc, tf): (u64, u64, u64, u64, Option<u64>, Option<u64>, Option<u64>) =
            self.with_conn("stats", |mut conn| async move {
                redis::pipe()
                    .zcard(&keys.pending)
                    .zcard(&keys.processing)
                    .zcard(&keys.completed)
                    .zcard(&keys.failed)
                    .get(queued)
                    .get(completed)
                    .get(failed)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        Ok(QueueStats {
            pending: p,
            processing: r,
            completed: c,
            failed: f,
            totals: QueueTotals {
                queued: tq.unwrap_or(0),
                completed: tc.unwrap_or(0),
                failed: tf.unwrap_or(0),
            },
        })
    }

    async fn scan_stuck(&self, older_than: DateTime<Utc>) -> Result<Vec<JobId>> {
        let cutoff = older_than.timestamp_millis();
        let raw: Vec<String> = self
            .with_conn("scan_stuck", |mut conn| async move {
                redis::cmd("ZRANGEBYSCORE")
                    .arg(&self.keys.processing)
                    .arg("-inf")
                    .arg(cutoff)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(parse_ids(raw))
    }

    async fn scan_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<JobId>> {
        let cutoff = older_than.timestamp_millis();
        let (completed, failed): (Vec<String>, Vec<String>) = self
            .with_conn("scan_stale", |mut conn| async move {
                redis::pipe()
                    .cmd("ZRANGEBYSCORE")
                    .arg(&self.keys.completed)
                    .arg("-inf")
                    .arg(cutoff)
                    .cmd("ZRANGEBYSCORE")
                    .arg(&self.keys.failed)
                    .arg("-inf")
                    .arg(cutoff)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let mut ids = parse_ids(completed);
        ids.extend(parse_ids(failed));
        Ok(ids)
    }

    async fn purge(&self, id: JobId) -> Result<bool> {
        let record = self.keys.record(id);
        let member = id.to_string();
        let (record, member) = (&record, &member);
        let removed: i64 = self
            .with_conn("purge", |mut conn| async move {
                self.scripts
                    .purge
                    .key(record)
                    .key(&self.keys.completed)
                    .key(&self.keys.failed)
                    .arg(member)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(removed == 1)
    }

    async fn evict(&self, id: JobId) -> Result<()> {
        let member = id.to_string();
        let member = &member;
        self.with_conn("evict", |mut conn| async move {
            redis::pipe()
                .atomic()
                .zrem(&self.keys.pending, member)
                .zrem(&self.keys.processing, member)
                .zrem(&self.keys.completed, member)
                .zrem(&self.keys.failed, member)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::DocumentType;

    fn queued_job() -> Job {
        Job::new(
            123_456_789_012_345_678,
            "/uploads/scan.pdf",
            DocumentType::Prescription,
            2,
            3,
        )
    }

    fn hash_of(job: &Job) -> Vec<Option<String>> {
        let fields = RecordFields::of(job).unwrap();
        vec![
            Some(fields.json),
            Some(fields.status.to_string()),
            Some(fields.attempt),
            Some(fields.started_at),
        ]
    }

    #[test]
    fn test_key_layout() {
        let keys = Keys::new("mdus");
        let id: JobId = "6f1c2c3e-8d4a-4a57-9a57-0d1e2f3a4b5c".parse().unwrap();
        assert_eq!(keys.record(id), "{mdus}:job:6f1c2c3e-8d4a-4a57-9a57-0d1e2f3a4b5c");
        assert_eq!(keys.pending, "{mdus}:jobs:pending");
        assert_eq!(keys.metric("jobs_failed"), "{mdus}:metrics:jobs_failed");

        let day = DateTime::parse_from_rfc3339("2024-03-09T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            keys.daily_metric("jobs_queued", day),
            "{mdus}:metrics:jobs_queued:2024-03-09"
        );
    }

    #[test]
    fn test_every_key_shares_one_hash_tag() {
        let keys = Keys::new("mdus");
        let now = Utc::now();
        for key in [
            keys.record(JobId::new()),
            keys.pending.clone(),
            keys.processing.clone(),
            keys.completed.clone(),
            keys.failed.clone(),
            keys.seq.clone(),
            keys.metric("jobs_queued"),
            keys.daily_metric("jobs_queued", now),
        ] {
            assert!(key.starts_with("{mdus}:"), "{} is outside the tag", key);
        }
    }

    #[test]
    fn test_pending_scores_fit_a_double() {
        let span: f64 = SEQ_SPAN.parse().unwrap();
        let worst = 4096.0 * span + span;
        assert!(worst < 2f64.powi(53));
    }

    #[test]
    fn test_parse_ids_skips_garbage() {
        let good = JobId::new();
        let ids = parse_ids(vec![good.to_string(), "not-a-uuid".to_string()]);
        assert_eq!(ids, vec![good]);
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            ..RedisConfig::default()
        };
        let err = RedisQueueBackend::connect(&config).err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_decode_record_round_trips_a_queued_job() {
        let job = queued_job();
        let decoded = decode_record(hash_of(&job)).unwrap().unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_decode_record_overlays_in_flight_fields() {
        let job = queued_job();
        let mut fields = hash_of(&job);
        fields[1] = Some("processing".to_string());
        fields[2] = Some("4".to_string());
        fields[3] = Some("2024-03-09T12:00:00+00:00".to_string());

        let decoded = decode_record(fields).unwrap().unwrap();
        assert_eq!(decoded.status, JobStatus::Processing);
        assert_eq!(decoded.attempt, 4);
        assert_eq!(
            decoded.started_at.unwrap().to_rfc3339(),
            "2024-03-09T12:00:00+00:00"
        );
        assert!(decoded.completed_at.is_none());
        // The JSON body is never rewritten, so wide integers stay exact.
        assert_eq!(decoded.document_id, 123_456_789_012_345_678);
        assert!(decoded.is_held_by(&decoded.lease().unwrap()));
    }

    #[test]
    fn test_decode_record_missing_body_is_gone() {
        assert!(decode_record(vec![None, None, None, None]).unwrap().is_none());
    }

    #[test]
    fn test_decode_record_rejects_bad_attempt() {
        let mut fields = hash_of(&queued_job());
        fields[2] = Some("two".to_string());
        let err = decode_record(fields).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeserializationError);
    }

    fn live_backend() -> RedisQueueBackend {
        let config = RedisConfig {
            url: std::env::var("MDUS_TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: format!("mdus-test-{}", uuid::Uuid::new_v4()),
            ..RedisConfig::default()
        };
        RedisQueueBackend::connect(&config).unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires MDUS_TEST_REDIS_URL
    async fn test_replayed_finish_after_lost_reply_succeeds_once() {
        let backend = live_backend();
        backend.enqueue(&queued_job()).await.unwrap();
        let mut job = backend.dequeue(Utc::now()).await.unwrap().unwrap();
        let lease = job.lease().unwrap();
        job.mark_failed("boom", Utc::now()).unwrap();

        let keys = &backend.keys;
        backend
            .finish("acknowledge_failed", &lease, &job, &keys.failed, "jobs_failed", false)
            .await
            .unwrap();

        // The same transition resent as a retry reads as already applied.
        backend
            .finish("acknowledge_failed", &lease, &job, &keys.failed, "jobs_failed", true)
            .await
            .unwrap();
        // A fresh caller still hits the fence.
        let err = backend.acknowledge_failed(&lease, &job).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotInFlight);
        // Replaying a different outcome is still rejected.
        let mut completed = job.clone();
        completed.status = JobStatus::Completed;
        let err = backend
            .finish("acknowledge_complete", &lease, &completed, &keys.completed, "jobs_completed", true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotInFlight);

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.totals.failed, 1);
    }
}
