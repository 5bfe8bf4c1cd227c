use indexmap::IndexMap;

pub(super) fn default_labels() -> IndexMap<String, String> {
    [
        ("pokemon_card", "Pokemon Card"),
        ("sports_card", "Sports Card"),
        ("action_figure", "Action Figure"),
        ("video_game", "Video Game"),
        ("comic_book", "Comic Book"),
        (super::FALLBACK_CATEGORY, super::FALLBACK_DISPLAY_LABEL),
    ]
    .into_iter()
    .map(|(key, label)| (key.to_string(), label.to_string()))
    .collect()
}
