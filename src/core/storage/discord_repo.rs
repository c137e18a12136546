use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, parse_ts, to_ts};
use crate::core::model::{
    DiscordBot, DiscordChannelBinding, SetTaskDiscordConfigRequest, TaskDiscordConfig,
};

/// Stores Discord delivery configuration. Webhook URLs are opaque strings
/// from the core's point of view.
#[derive(Clone)]
pub struct DiscordRepository {
    db: Database,
}

impl DiscordRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ── Bots ──

    pub async fn create_bot(&self, name: &str, is_default: bool) -> Result<DiscordBot> {
        let bot = DiscordBot {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            is_default,
            created_at: Utc::now(),
        };
        let conn = self.db.lock().await;
        if is_default {
            conn.execute("UPDATE discord_bots SET is_default = 0 WHERE is_default = 1", [])?;
        }
        conn.execute(
            "INSERT INTO discord_bots (id, name, is_default, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![bot.id, bot.name, bot.is_default, to_ts(bot.created_at)],
        )
        .context("failed to create bot")?;
        Ok(bot)
    }

    pub async fn list_bots(&self) -> Result<Vec<DiscordBot>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, is_default, created_at FROM discord_bots
             ORDER BY is_default DESC, created_at",
        )?;
        let rows = stmt.query_map([], read_bot)?;
        let mut bots = Vec::new();
        for row in rows {
            let (bot, created_at) = row?;
            bots.push(hydrate_bot(bot, created_at)?);
        }
        Ok(bots)
    }

    pub async fn default_bot(&self) -> Result<Option<DiscordBot>> {
        let conn = self.db.lock().await;
        let row = conn
            .query_row(
                "SELECT id, name, is_default, created_at FROM discord_bots
                 WHERE is_default = 1 LIMIT 1",
                [],
                read_bot,
            )
            .optional()?;
        row.map(|(bot, created_at)| hydrate_bot(bot, created_at)).transpose()
    }

    // ── Channels ──

    pub async fn create_channel(
        &self,
        bot_id: &str,
        name: &str,
        webhook_url: &str,
    ) -> Result<DiscordChannelBinding> {
        let channel = DiscordChannelBinding {
            id: uuid::Uuid::new_v4().to_string(),
            bot_id: bot_id.to_string(),
            name: name.to_string(),
            webhook_url: webhook_url.to_string(),
            created_at: Utc::now(),
        };
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO discord_channels (id, bot_id, name, webhook_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                channel.id,
                channel.bot_id,
                channel.name,
                channel.webhook_url,
                to_ts(channel.created_at)
            ],
        )
        .context("failed to create channel")?;
        Ok(channel)
    }

    pub async fn list_channels(&self, bot_id: Option<&str>) -> Result<Vec<DiscordChannelBinding>> {
        let conn = self.db.lock().await;
        let mut channels = Vec::new();
        match bot_id {
            Some(bot_id) => {
                let mut stmt = conn.prepare(
                    "SELECT id, bot_id, name, webhook_url, created_at FROM discord_channels
                     WHERE bot_id = ?1 ORDER BY created_at",
                )?;
                let rows = stmt.query_map([bot_id], read_channel)?;
                for row in rows {
                    let (channel, created_at) = row?;
                    channels.push(hydrate_channel(channel, created_at)?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, bot_id, name, webhook_url, created_at FROM discord_channels
                     ORDER BY created_at",
                )?;
                let rows = stmt.query_map([], read_channel)?;
                for row in rows {
                    let (channel, created_at) = row?;
                    channels.push(hydrate_channel(channel, created_at)?);
                }
            }
        }
        Ok(channels)
    }

    pub async fn channel_webhook(&self, channel_id: &str) -> Result<Option<String>> {
        let conn = self.db.lock().await;
        let url: Option<String> = conn
            .query_row(
                "SELECT webhook_url FROM discord_channels WHERE id = ?1",
                [channel_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(url.filter(|u| !u.is_empty()))
    }

    // ── Per-task config ──

    pub async fn set_task_config(
        &self,
        task_id: &str,
        req: &SetTaskDiscordConfigRequest,
    ) -> Result<TaskDiscordConfig> {
        let config = TaskDiscordConfig {
            task_id: task_id.to_string(),
            channel_id: req.channel_id.clone(),
            webhook_url: req.webhook_url.clone(),
            template: req.template.clone(),
            username: req.username.clone(),
            avatar_url: req.avatar_url.clone(),
            updated_at: Utc::now(),
        };
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO task_discord_configs
                 (task_id, channel_id, webhook_url, template, username, avatar_url, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (task_id) DO UPDATE SET
                 channel_id = excluded.channel_id,
                 webhook_url = excluded.webhook_url,
                 template = excluded.template,
                 username = excluded.username,
                 avatar_url = excluded.avatar_url,
                 updated_at = excluded.updated_at",
            params![
                config.task_id,
                config.channel_id,
                config.webhook_url,
                config.template,
                config.username,
                config.avatar_url,
                to_ts(config.updated_at)
            ],
        )
        .context("failed to set task Discord config")?;
        Ok(config)
    }

    pub async fn task_config(&self, task_id: &str) -> Result<Option<TaskDiscordConfig>> {
        let conn = self.db.lock().await;
        let row = conn
            .query_row(
                "SELECT task_id, channel_id, webhook_url, template, username, avatar_url, updated_at
                 FROM task_discord_configs WHERE task_id = ?1",
                [task_id],
                |row: &Row<'_>| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        row.map(
            |(task_id, channel_id, webhook_url, template, username, avatar_url, updated_at)| {
                Ok(TaskDiscordConfig {
                    task_id,
                    channel_id,
                    webhook_url: webhook_url.filter(|u| !u.is_empty()),
                    template,
                    username,
                    avatar_url,
                    updated_at: parse_ts(&updated_at)?,
                })
            },
        )
        .transpose()
    }

    pub async fn delete_task_config(&self, task_id: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute("DELETE FROM task_discord_configs WHERE task_id = ?1", [task_id])?;
        Ok(())
    }

    /// Resolves the outbound webhook for a task: task-level override first,
    /// then the task's channel binding, then the default bot's first channel.
    pub async fn get_webhook_for_task(&self, task_id: &str) -> Result<Option<String>> {
        if let Some(config) = self.task_config(task_id).await? {
            if let Some(url) = config.webhook_url {
                return Ok(Some(url));
            }
            if let Some(channel_id) = config.channel_id
                && let Some(url) = self.channel_webhook(&channel_id).await?
            {
                return Ok(Some(url));
            }
        }

        let Some(bot) = self.default_bot().await? else {
            return Ok(None);
        };
        let channels = self.list_channels(Some(&bot.id)).await?;
        let Some(first) = channels.first() else {
            return Ok(None);
        };
        self.channel_webhook(&first.id).await
    }
}

fn read_bot(row: &Row<'_>) -> rusqlite::Result<((String, String, bool), String)> {
    Ok((
        (row.get(0)?, row.get(1)?, row.get(2)?),
        row.get::<_, String>(3)?,
    ))
}

fn hydrate_bot((id, name, is_default): (String, String, bool), created_at: String) -> Result<DiscordBot> {
    Ok(DiscordBot {
        id,
        name,
        is_default,
        created_at: parse_ts(&created_at)?,
    })
}

fn read_channel(row: &Row<'_>) -> rusqlite::Result<((String, String, String, String), String)> {
    Ok((
        (row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?),
        row.get::<_, String>(4)?,
    ))
}

fn hydrate_channel(
    (id, bot_id, name, webhook_url): (String, String, String, String),
    created_at: String,
) -> Result<DiscordChannelBinding> {
    Ok(DiscordChannelBinding {
        id,
        bot_id,
        name,
        webhook_url,
        created_at: parse_ts(&created_at)?,
    })
}
