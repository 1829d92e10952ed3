use serenity::http::Http;
use serenity::model::id::ChannelId as DiscordChannelId;

use crate::model::constants::DISCORD_MESSAGE_LIMIT;
use crate::model::types::ChannelId;

/// Post `content` to a text channel, split across as many messages as
/// Discord's length limit requires.
pub async fn send_long_message(
    http: &Http,
    channel_id: ChannelId,
    content: &str,
) -> Result<(), serenity::Error> {
    for chunk in split_message(content, DISCORD_MESSAGE_LIMIT) {
        DiscordChannelId(channel_id).say(http, chunk).await?;
    }
    Ok(())
}

/// Split on line boundaries so transcript lines stay intact; a single
/// line longer than the limit is hard-split on char boundaries.
pub fn split_message(content: &str, max_length: usize) -> Vec<String> {
    if content.chars().count() <= max_length {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in content.split('\n') {
        let line_len = line.chars().count();
        if line_len > max_length {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            for piece in char_chunks(line, max_length) {
                chunks.push(piece);
            }
            continue;
        }
        if current_len + line_len + 1 > max_length && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn char_chunks(line: &str, max_length: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(max_length)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
