//! Bot command set and the role each command requires.

use crate::config::Role;
use teloxide::utils::command::BotCommands;

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Supported commands:")]
pub enum Command {
    /// Start the bot, or open a shared video link
    #[command(description = "Start the bot.")]
    Start(String),
    /// Liveness check
    #[command(description = "Check that the bot responds.")]
    Ping,
    /// Role-aware command list
    #[command(description = "Show available commands.")]
    Help,
    /// List stored videos as buttons
    #[command(description = "Browse videos.")]
    Browse,
    /// Send a random video
    #[command(description = "Get a random video.")]
    Random,
    /// Search videos by name or description
    #[command(description = "Search videos: /find <query>.", alias = "search")]
    Find(String),
    /// Delete a video by id
    #[command(description = "Delete a video: /delete <id>.")]
    Delete(String),
    /// List all video ids
    #[command(description = "List stored videos.")]
    Database,
    /// List administrators
    #[command(description = "Show administrators.")]
    Admin,
    /// Headline counters
    #[command(description = "Show bot statistics.")]
    Stats,
    /// View analytics
    #[command(description = "Show view analytics.")]
    Analytics,
    /// Ban a user
    #[command(description = "Ban a user: /ban_user <id> [reason].")]
    BanUser(String),
    /// Lift a ban
    #[command(description = "Unban a user: /unban_user <id>.")]
    UnbanUser(String),
    /// List banned users
    #[command(description = "List banned users.")]
    BannedUsers,
    /// Ban several users at once
    #[command(description = "Ban several users: /bulk_ban <id> <id> ... [| reason].")]
    BulkBan(String),
    /// Details about one user
    #[command(description = "Show user details: /user_info <id>.")]
    UserInfo(String),
    /// Search known users
    #[command(description = "Search users: /search_users <query>.")]
    SearchUsers(String),
    /// Latest activity across users
    #[command(description = "Show recent activity.")]
    RecentActivity,
    /// Message every user (owner only)
    #[command(description = "Message all users: /broadcast <text>.")]
    Broadcast(String),
    /// Forget users who blocked the bot (owner only)
    #[command(description = "Remove users who blocked the bot.")]
    CleanupUsers,
    /// Post to a configured channel
    #[command(description = "Post to a channel.")]
    ChannelBroadcast,
    /// List or create scheduled channel posts
    #[command(description = "Schedule a post: /schedule <channel> <time> <text>.")]
    Schedule(String),
    /// Abort the current dialogue
    #[command(description = "Cancel the current operation.")]
    Cancel,
    /// Toggle the channel-membership requirement (owner only)
    #[command(description = "Toggle required channel membership.")]
    JoinAccess,
}

impl Command {
    /// Minimum role allowed to run the command
    #[must_use]
    pub const fn required_role(&self) -> Role {
        match self {
            Self::Start(_)
            | Self::Ping
            | Self::Help
            | Self::Browse
            | Self::Random
            | Self::Find(_)
            | Self::Cancel => Role::User,
            Self::Broadcast(_) | Self::CleanupUsers | Self::JoinAccess => Role::Owner,
            Self::Delete(_)
            | Self::Database
            | Self::Admin
            | Self::Stats
            | Self::Analytics
            | Self::BanUser(_)
            | Self::UnbanUser(_)
            | Self::BannedUsers
            | Self::BulkBan(_)
            | Self::UserInfo(_)
            | Self::SearchUsers(_)
            | Self::RecentActivity
            | Self::ChannelBroadcast
            | Self::Schedule(_) => Role::Admin,
        }
    }

    /// Label recorded in the activity trail
    #[must_use]
    pub const fn action_label(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Ping => "ping",
            Self::Help => "help",
            Self::Browse => "browse",
            Self::Random => "random",
            Self::Find(_) => "find",
            Self::Delete(_) => "delete",
            Self::Database => "database",
            Self::Admin => "admin",
            Self::Stats => "stats",
            Self::Analytics => "analytics",
            Self::BanUser(_) => "ban_user",
            Self::UnbanUser(_) => "unban_user",
            Self::BannedUsers => "banned_users",
            Self::BulkBan(_) => "bulk_ban",
            Self::UserInfo(_) => "user_info",
            Self::SearchUsers(_) => "search_users",
            Self::RecentActivity => "recent_activity",
            Self::Broadcast(_) => "broadcast",
            Self::CleanupUsers => "cleanup_users",
            Self::ChannelBroadcast => "channel_broadcast",
            Self::Schedule(_) => "schedule",
            Self::Cancel => "cancel",
            Self::JoinAccess => "join_access",
        }
    }

    /// Arguments, when the command takes any
    #[must_use]
    pub fn args(&self) -> &str {
        match self {
            Self::Start(a)
            | Self::Find(a)
            | Self::Delete(a)
            | Self::BanUser(a)
            | Self::UnbanUser(a)
            | Self::BulkBan(a)
            | Self::UserInfo(a)
            | Self::SearchUsers(a)
            | Self::Broadcast(a)
            | Self::Schedule(a) => a.as_str(),
            _ => "",
        }
    }
}
