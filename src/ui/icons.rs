//! Shared UI icons and emojis.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[WAIT]");

// Stage indicators
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
pub static LESSON: Emoji<'_, '_> = Emoji("📝 ", "[L]");
pub static ROLLBACK: Emoji<'_, '_> = Emoji("⏪ ", "[<<]");
