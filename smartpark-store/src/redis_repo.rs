use redis::RedisResult;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// Fixed-window counter. Returns `true` while `key` is within `limit` hits per window.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = rate_limit_pipeline(key, window_seconds).query_async(&mut conn).await?;

        Ok(count <= limit)
    }
}

/// The window starts with the first hit; later hits only count.
fn rate_limit_pipeline(key: &str, window_seconds: i64) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .cmd("SET")
        .arg(key)
        .arg(0)
        .arg("EX")
        .arg(window_seconds)
        .arg("NX")
        .ignore()
        .incr(key, 1);
    pipe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_window_is_not_extended_by_hits() {
        let packed = String::from_utf8_lossy(&rate_limit_pipeline("ratelimit:10.0.0.1", 60).get_packed_pipeline()).to_string();

        assert!(packed.contains("SET"));
        assert!(packed.contains("NX"));
        assert!(packed.contains("INCR"));
        assert!(!packed.contains("EXPIRE"));
    }
}
