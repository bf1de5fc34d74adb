//! コンテナ識別子とサブドメインの導出
//!
//! 純粋関数のみ。サブドメインは識別子に対して決定的だが
//! グローバルに一意ではない。一意性が必要な呼び出し側は
//! `salted_subdomain` で再試行する。

use uuid::Uuid;

/// 管理対象コンテナ名のプレフィックス
pub const CONTAINER_PREFIX: &str = "n8n";

const HASH_MODULUS: u64 = 1_000_000_007;

const ANIMALS: &[&str] = &[
    "fox", "wolf", "bear", "panda", "koala", "lion", "tiger", "deer", "otter", "seal", "meerkat",
    "badger", "gecko", "lemur", "sloth", "wombat", "lynx", "fawn",
];
const PETS: &[&str] = &[
    "dog", "cat", "bunny", "hamster", "puppy", "kitten", "rabbit", "ferret", "mouse", "guinea",
    "beagle", "corgi", "poodle", "husky", "shiba", "pony", "turtle", "budgie", "finch",
];
const TREES: &[&str] = &[
    "oak", "pine", "maple", "birch", "cedar", "aspen", "willow", "spruce", "cherry", "palm",
    "poplar", "juniper", "walnut", "fir", "elder", "apple", "peach", "plum",
];
const FRUITS: &[&str] = &[
    "apple", "pear", "mango", "peach", "berry", "plum", "kiwi", "melon", "grape", "cherry",
    "lemon", "orange", "lime", "fig", "date", "guava",
];
const FLOWERS: &[&str] = &[
    "daisy", "tulip", "lily", "rose", "lotus", "violet", "iris", "poppy", "peony", "jasmine",
    "orchid", "clover", "daffodil", "zinnia",
];
const COLORS: &[&str] = &[
    "red", "blue", "green", "gold", "silver", "amber", "rose", "azure", "teal", "coral", "indigo",
    "ruby", "emerald", "topaz", "jade", "pearl", "mint", "blush",
];
const ADJECTIVES: &[&str] = &[
    "swift", "brave", "happy", "lucky", "sunny", "jolly", "noble", "merry", "calm", "kind",
    "sweet", "gentle", "witty", "fancy", "clever", "fluffy", "cozy", "snug", "perky", "mellow",
    "cute",
];

const FIRST_WORDS: &[&[&str]] = &[ADJECTIVES, COLORS, ANIMALS, PETS];
const SECOND_WORDS: &[&[&str]] = &[TREES, FRUITS, FLOWERS, ANIMALS, PETS];

/// 複数カテゴリを連結した単語リスト
struct WordList(&'static [&'static [&'static str]]);

impl WordList {
    fn len(&self) -> usize {
        self.0.iter().map(|l| l.len()).sum()
    }

    fn get(&self, mut index: usize) -> &'static str {
        for list in self.0 {
            if index < list.len() {
                return list[index];
            }
            index -= list.len();
        }
        // インデックスは常に len() で剰余を取る
        self.0[0][0]
    }
}

/// `n8n-<オーナー ID 先頭 8 文字>-<正規化した名前>`
pub fn container_identifier(owner_id: Uuid, instance_name: &str) -> String {
    let sanitized = instance_name
        .to_lowercase()
        .replace([' ', '_'], "-");
    let owner = owner_id.to_string();
    format!("{}-{}-{}", CONTAINER_PREFIX, &owner[..8], sanitized)
}

/// `gentle-maple` のような単語ペアのサブドメイン
pub fn subdomain(identifier: &str) -> String {
    let first_words = WordList(FIRST_WORDS);
    let second_words = WordList(SECOND_WORDS);

    let hash = identifier
        .chars()
        .fold(0u64, |hash, c| (hash * 31 + c as u64) % HASH_MODULUS);

    let first = first_words.get((hash % first_words.len() as u64) as usize);
    let mut second_index = ((hash / 100) % second_words.len() as u64) as usize;
    if second_words.get(second_index) == first {
        second_index = (second_index + 1) % second_words.len();
    }

    format!("{}-{}", first, second_words.get(second_index))
}

/// `attempt` 回目の候補。attempt 0 は `subdomain(identifier)` と同じ
pub fn salted_subdomain(identifier: &str, attempt: u32) -> String {
    if attempt == 0 {
        subdomain(identifier)
    } else {
        subdomain(&format!("{}#{}", identifier, attempt))
    }
}

/// インスタンスの名前付きボリューム: (data, files)
pub fn volume_names(identifier: &str) -> (String, String) {
    (format!("{}-data", identifier), format!("{}-files", identifier))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Uuid {
        Uuid::parse_str("12345678-9abc-def0-1234-56789abcdef0").unwrap()
    }

    #[test]
    fn test_container_identifier() {
        assert_eq!(
            container_identifier(owner(), "My App"),
            "n8n-12345678-my-app"
        );
        assert_eq!(
            container_identifier(owner(), "Sales_Flows v2"),
            "n8n-12345678-sales-flows-v2"
        );
    }

    #[test]
    fn test_identifier_is_deterministic() {
        let a = container_identifier(owner(), "My App");
        let b = container_identifier(owner(), "My App");
        assert_eq!(a, b);
        assert_eq!(subdomain(&a), subdomain(&b));
    }

    #[test]
    fn test_known_subdomains() {
        assert_eq!(subdomain("n8n-12345678-my-app"), "gentle-maple");
        assert_eq!(subdomain("n8n-00000000-test"), "brave-lynx");
    }

    #[test]
    fn test_identical_words_are_bumped() {
        // ずらす前は beagle/beagle になる
        assert_eq!(subdomain("n8n-abcdef01-app-46"), "beagle-corgi");
    }

    #[test]
    fn test_never_self_collides() {
        for i in 0..5000 {
            let sub = subdomain(&format!("n8n-abcdef01-app-{}", i));
            let (first, second) = sub.split_once('-').unwrap();
            assert_ne!(first, second, "self-collision for app-{}", i);
        }
    }

    #[test]
    fn test_salted_subdomain() {
        let id = "n8n-12345678-my-app";
        assert_eq!(salted_subdomain(id, 0), subdomain(id));
        assert_eq!(salted_subdomain(id, 1), "turtle-guinea");
    }

    #[test]
    fn test_word_list_sizes() {
        assert_eq!(WordList(FIRST_WORDS).len(), 76);
        assert_eq!(WordList(SECOND_WORDS).len(), 85);
    }

    #[test]
    fn test_volume_names() {
        let (data, files) = volume_names("n8n-12345678-my-app");
        assert_eq!(data, "n8n-12345678-my-app-data");
        assert_eq!(files, "n8n-12345678-my-app-files");
    }
}
