//! Random nickname generator.
//!
//! Produces nicknames like `SlyOwl42`. Every combination stays within the
//! 9-character limit many networks still enforce.

use rand::RngExt;

const ADJECTIVES: &[&str] = &[
    "Sly", "Odd", "Icy", "Hex", "Neo", "Zen", "Dim", "Raw", "Shy", "Wry", "Fey", "Red", "Big",
    "Mad", "Lit", "Coy",
];

const NOUNS: &[&str] = &[
    "Fox", "Owl", "Elk", "Yak", "Emu", "Cat", "Bat", "Eel", "Ram", "Koi", "Jay", "Ant", "Bee",
    "Cod", "Gnu", "Hen", "Crab",
];

pub const MAX_GENERATED_LEN: usize = 9;

/// Generate a random nickname like `HexCrab07`.
pub fn generate_nickname() -> String {
    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let num: u8 = rng.random_range(0..100);
    format!("{}{}{:02}", adj, noun, num)
}
