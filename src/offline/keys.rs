/// 收件人队列名前缀
const RECIPIENT_QUEUE_PREFIX: &str = "offline_messages.";

/// 路由键前缀
const ROUTING_KEY_PREFIX: &str = "offline.";

/// 生成收件人专属队列名
pub fn recipient_queue(username: &str) -> String {
    format!("{}{}", RECIPIENT_QUEUE_PREFIX, username)
}

/// 由队列名推导出稳定的路由键
pub fn routing_key(queue: &str) -> String {
    let suffix = queue.strip_prefix(RECIPIENT_QUEUE_PREFIX).unwrap_or(queue);
    format!("{}{}", ROUTING_KEY_PREFIX, suffix)
}
