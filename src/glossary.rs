//! Header glossary, table kinds and the canonical-name resolver.
//!
//! Raw headers such as `Cmp` or `Att` mean different things in different
//! tables, so resolution always happens in a table context. The resolver is
//! built once per run from immutable inputs and passed by reference to every
//! stage that needs it.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    fs,
    marker::PhantomData,
    path::Path,
};

use anyhow::{Context, Result};
use log::debug;
use regex::Regex;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{IgnoredAny, MapAccess, Visitor},
};

use crate::{
    config::ConfigError,
    ident::{self, IDENTIFIER_MAX_LEN, header_key, normalize_header},
    infer::{NameHint, SemanticType, name_hint},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Standard,
    Shooting,
    Passing,
    PassingTypes,
    GoalShotCreation,
    Defense,
    Possession,
    PlayingTime,
    Misc,
    Keeper,
    KeeperAdvanced,
}

impl TableKind {
    pub const ALL: [TableKind; 11] = [
        TableKind::Standard,
        TableKind::Shooting,
        TableKind::Passing,
        TableKind::PassingTypes,
        TableKind::GoalShotCreation,
        TableKind::Defense,
        TableKind::Possession,
        TableKind::PlayingTime,
        TableKind::Misc,
        TableKind::Keeper,
        TableKind::KeeperAdvanced,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            TableKind::Standard => "stats_standard",
            TableKind::Shooting => "stats_shooting",
            TableKind::Passing => "stats_passing",
            TableKind::PassingTypes => "stats_passing_types",
            TableKind::GoalShotCreation => "stats_gca",
            TableKind::Defense => "stats_defense",
            TableKind::Possession => "stats_possession",
            TableKind::PlayingTime => "stats_playing_time",
            TableKind::Misc => "stats_misc",
            TableKind::Keeper => "stats_keeper",
            TableKind::KeeperAdvanced => "stats_keeper_adv",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            TableKind::Standard => &["standard", "stats"],
            TableKind::Shooting => &["shooting"],
            TableKind::Passing => &["passing"],
            TableKind::PassingTypes => &["passing_types", "pass_types"],
            TableKind::GoalShotCreation => &[
                "gca",
                "goal_shot_creation",
                "goal_and_shot_creation",
                "shot_creation",
            ],
            TableKind::Defense => &["defense", "defence", "defensive_actions"],
            TableKind::Possession => &["possession"],
            TableKind::PlayingTime => &["playing_time", "playingtime"],
            TableKind::Misc => &["misc", "miscellaneous"],
            TableKind::Keeper => &["keeper", "keepers", "goalkeeping"],
            TableKind::KeeperAdvanced => &[
                "keeper_adv",
                "keepers_adv",
                "keepersadv",
                "advanced_goalkeeping",
                "goalkeeping_advanced",
            ],
        }
    }

    /// Recognise a table kind from a logical table name, file stem or
    /// glossary section title.
    pub fn from_table_name(name: &str) -> Option<TableKind> {
        let sanitized = ident::sanitize_table_name(name);
        let mut key = sanitized.as_str();
        for prefix in ["player_", "stats_"] {
            key = key.strip_prefix(prefix).unwrap_or(key);
        }
        if key != "stats" {
            key = key.strip_suffix("_stats").unwrap_or(key);
        }
        TableKind::ALL
            .into_iter()
            .find(|kind| kind.aliases().contains(&key))
    }

    fn overrides(self) -> &'static [(&'static str, &'static str)] {
        match self {
            TableKind::Standard => &[],
            TableKind::Shooting => SHOOTING_OVERRIDES,
            TableKind::Passing => PASSING_OVERRIDES,
            TableKind::PassingTypes => PASSING_TYPES_OVERRIDES,
            TableKind::GoalShotCreation => GCA_OVERRIDES,
            TableKind::Defense => DEFENSE_OVERRIDES,
            TableKind::Possession => POSSESSION_OVERRIDES,
            TableKind::PlayingTime => PLAYING_TIME_OVERRIDES,
            TableKind::Misc => MISC_OVERRIDES,
            TableKind::Keeper => KEEPER_OVERRIDES,
            TableKind::KeeperAdvanced => KEEPER_ADV_OVERRIDES,
        }
    }

    /// Standard slot of a canonical column in this kind of table. Identity
    /// columns lead every table; columns without a slot return `None`.
    pub fn column_slot(self, name: &str) -> Option<usize> {
        LEADING_COLUMNS
            .iter()
            .position(|column| *column == name)
            .or_else(|| {
                self.stat_order()
                    .iter()
                    .position(|column| *column == name)
                    .map(|idx| LEADING_COLUMNS.len() + idx)
            })
    }

    fn stat_order(self) -> &'static [&'static str] {
        match self {
            TableKind::Standard => STANDARD_ORDER,
            TableKind::Shooting => SHOOTING_ORDER,
            TableKind::Passing => PASSING_ORDER,
            TableKind::PassingTypes => PASSING_TYPES_ORDER,
            TableKind::GoalShotCreation => GCA_ORDER,
            TableKind::Defense => DEFENSE_ORDER,
            TableKind::Possession => POSSESSION_ORDER,
            TableKind::PlayingTime => PLAYING_TIME_ORDER,
            TableKind::Misc => MISC_ORDER,
            TableKind::Keeper => KEEPER_ORDER,
            TableKind::KeeperAdvanced => KEEPER_ADV_ORDER,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Headers whose meaning does not depend on the table they appear in.
const GLOBAL_HEADERS: &[(&str, &str)] = &[
    ("Rk", "rank"),
    ("Player", "player_name"),
    ("Nation", "nation"),
    ("Pos", "position"),
    ("Squad", "squad"),
    ("Comp", "competition"),
    ("Age", "age"),
    ("Born", "birth_year"),
    ("MP", "matches_played"),
    ("Starts", "starts"),
    ("Min", "minutes"),
    ("90s", "nineties_played"),
    ("Gls", "goals"),
    ("Ast", "assists"),
    ("G+A", "goals_assists"),
    ("G-PK", "goals_minus_pk"),
    ("PK", "penalty_goals"),
    ("PKatt", "penalty_attempts"),
    ("CrdY", "yellow_cards"),
    ("CrdR", "red_cards"),
    ("xG", "expected_goals"),
    ("npxG", "non_penalty_xg"),
    ("xAG", "expected_assists"),
    ("npxG+xAG", "npxg_plus_xag"),
    ("G+A-PK", "goals_assists_minus_pk"),
    ("xG+xAG", "xg_plus_xag"),
    ("PrgC", "progressive_carries"),
    ("PrgP", "progressive_passes"),
    ("PrgR", "progressive_receives"),
    ("Matches", "matches_link"),
];

const SHOOTING_OVERRIDES: &[(&str, &str)] = &[
    ("Sh", "shots"),
    ("SoT", "shots_on_target"),
    ("SoT%", "shots_on_target_pct"),
    ("Sh/90", "shots_per_90"),
    ("SoT/90", "shots_on_target_per_90"),
    ("G/Sh", "goals_per_shot"),
    ("G/SoT", "goals_per_shot_on_target"),
    ("Dist", "avg_shot_distance"),
    ("FK", "free_kick_shots"),
    ("npxG/Sh", "npxg_per_shot"),
    ("G-xG", "goals_minus_xg"),
    ("np:G-xG", "non_penalty_goals_minus_xg"),
];

const PASSING_OVERRIDES: &[(&str, &str)] = &[
    ("Cmp", "passes_completed"),
    ("Att", "passes_attempted"),
    ("Cmp%", "pass_completion_pct"),
    ("TotDist", "total_pass_distance"),
    ("PrgDist", "progressive_pass_distance"),
    ("xA", "expected_assisted_goals"),
    ("A-xAG", "assists_minus_xag"),
    ("KP", "key_passes"),
    ("1/3", "passes_into_final_third"),
    ("PPA", "passes_into_penalty_area"),
    ("CrsPA", "crosses_into_penalty_area"),
];

const PASSING_TYPES_OVERRIDES: &[(&str, &str)] = &[
    ("Att", "passes_attempted"),
    ("Cmp", "passes_completed"),
    ("Live", "passes_live"),
    ("Dead", "passes_dead"),
    ("FK", "passes_free_kick"),
    ("TB", "passes_through_ball"),
    ("Sw", "passes_switched"),
    ("Crs", "passes_crosses"),
    ("TI", "passes_throw_in"),
    ("CK", "passes_corner_kick"),
    ("In", "corner_kicks_inswinging"),
    ("Out", "corner_kicks_outswinging"),
    ("Str", "corner_kicks_straight"),
    ("Off", "passes_offside"),
    ("Blocks", "passes_blocked"),
];

const GCA_OVERRIDES: &[(&str, &str)] = &[
    ("SCA", "shot_creating_actions"),
    ("SCA90", "shot_creating_actions_per_90"),
    ("PassLive", "sca_live_pass"),
    ("PassDead", "sca_dead_pass"),
    ("TO", "sca_take_on"),
    ("Sh", "sca_shot"),
    ("Fld", "sca_foul_drawn"),
    ("Def", "sca_defensive_action"),
    ("GCA", "goal_creating_actions"),
    ("GCA90", "goal_creating_actions_per_90"),
];

const DEFENSE_OVERRIDES: &[(&str, &str)] = &[
    ("Tkl", "tackles"),
    ("TklW", "tackles_won"),
    ("Def 3rd", "tackles_def_third"),
    ("Mid 3rd", "tackles_mid_third"),
    ("Att 3rd", "tackles_att_third"),
    ("Att", "challenges_attempted"),
    ("Tkl%", "challenge_success_pct"),
    ("Lost", "challenges_lost"),
    ("Blocks", "blocks"),
    ("Sh", "blocked_shots"),
    ("Pass", "blocked_passes"),
    ("Int", "interceptions"),
    ("Tkl+Int", "tackles_plus_interceptions"),
    ("Clr", "clearances"),
    ("Err", "errors"),
];

const POSSESSION_OVERRIDES: &[(&str, &str)] = &[
    ("Touches", "touches"),
    ("Def Pen", "touches_def_pen"),
    ("Def 3rd", "touches_def_third"),
    ("Mid 3rd", "touches_mid_third"),
    ("Att 3rd", "touches_att_third"),
    ("Att Pen", "touches_att_pen"),
    ("Live", "touches_live"),
    ("Att", "take_ons_attempted"),
    ("Succ", "take_ons_successful"),
    ("Succ%", "take_on_success_pct"),
    ("Tkld", "take_ons_tackled"),
    ("Tkld%", "take_ons_tackled_pct"),
    ("Carries", "carries"),
    ("TotDist", "carry_distance"),
    ("PrgDist", "carry_progressive_distance"),
    ("1/3", "carries_into_final_third"),
    ("CPA", "carries_into_penalty_area"),
    ("Mis", "miscontrols"),
    ("Dis", "dispossessed"),
    ("Rec", "passes_received"),
];

const PLAYING_TIME_OVERRIDES: &[(&str, &str)] = &[
    ("Mn/MP", "minutes_per_match"),
    ("Min%", "minutes_pct"),
    ("Mn/Start", "minutes_per_start"),
    ("Compl", "complete_matches"),
    ("Subs", "substitute_appearances"),
    ("Mn/Sub", "minutes_per_sub"),
    ("unSub", "unused_sub"),
    ("PPM", "points_per_match"),
    ("onG", "on_goals"),
    ("onGA", "on_goals_against"),
    ("+/-", "plus_minus"),
    ("+/-90", "plus_minus_per_90"),
    ("On-Off", "on_off"),
    ("onxG", "on_expected_goals"),
    ("onxGA", "on_expected_goals_against"),
    ("xG+/-", "expected_goals_plus_minus"),
    ("xG+/-90", "expected_goals_plus_minus_per_90"),
];

const MISC_OVERRIDES: &[(&str, &str)] = &[
    ("2CrdY", "second_yellow_cards"),
    ("Fls", "fouls_committed"),
    ("Fld", "fouls_drawn"),
    ("Off", "offsides"),
    ("Crs", "crosses"),
    ("Int", "interceptions"),
    ("TklW", "tackles_won"),
    ("PKwon", "penalties_won"),
    ("PKcon", "penalties_conceded"),
    ("OG", "own_goals"),
    ("Recov", "ball_recoveries"),
    ("Won", "aerials_won"),
    ("Lost", "aerials_lost"),
    ("Won%", "aerial_win_pct"),
];

const KEEPER_OVERRIDES: &[(&str, &str)] = &[
    ("GA", "goals_against"),
    ("GA90", "goals_against_per_90"),
    ("SoTA", "shots_on_target_against"),
    ("Saves", "saves"),
    ("Save%", "save_pct"),
    ("W", "wins"),
    ("D", "draws"),
    ("L", "losses"),
    ("CS", "clean_sheets"),
    ("CS%", "clean_sheet_pct"),
    ("PKatt", "penalty_kicks_faced"),
    ("PKA", "penalty_goals_against"),
    ("PKsv", "penalty_saves"),
    ("PKm", "penalty_kicks_missed"),
];

const KEEPER_ADV_OVERRIDES: &[(&str, &str)] = &[
    ("GA", "goals_against"),
    ("PKA", "penalty_goals_against"),
    ("FK", "free_kick_goals_against"),
    ("CK", "corner_kick_goals_against"),
    ("OG", "own_goals_against"),
    ("PSxG", "post_shot_expected_goals"),
    ("PSxG/SoT", "post_shot_xg_per_shot_on_target"),
    ("PSxG+/-", "post_shot_xg_plus_minus"),
    ("/90", "post_shot_xg_plus_minus_per_90"),
    ("Cmp", "launches"),
    ("Att", "launches_attempted"),
    ("Cmp%", "launch_completion_pct"),
    ("Att (GK)", "passes_attempted_gk"),
    ("Thr", "throws_attempted"),
    ("Launch%", "launch_pct"),
    ("AvgLen", "avg_pass_length"),
    ("Opp", "crosses_faced"),
    ("Stp", "crosses_stopped"),
    ("Stp%", "cross_stop_pct"),
    ("#OPA", "defensive_actions_outside_penalty_area"),
    ("#OPA/90", "defensive_actions_outside_penalty_area_per_90"),
    ("AvgDist", "avg_defensive_action_distance"),
];

/// Columns that lead every staged table, in order.
const LEADING_COLUMNS: &[&str] = &[
    "rank",
    "player_name",
    "nation",
    "position",
    "squad",
    "competition",
    "age",
    "birth_year",
];

const STANDARD_ORDER: &[&str] = &[
    "matches_played",
    "starts",
    "minutes",
    "nineties_played",
    "goals",
    "assists",
    "goals_assists",
    "goals_minus_pk",
    "penalty_goals",
    "penalty_attempts",
    "yellow_cards",
    "red_cards",
    "expected_goals",
    "non_penalty_xg",
    "expected_assists",
    "npxg_plus_xag",
    "progressive_carries",
    "progressive_passes",
    "progressive_receives",
    "goals_assists_minus_pk",
    "xg_plus_xag",
];

const SHOOTING_ORDER: &[&str] = &[
    "nineties_played",
    "goals",
    "shots",
    "shots_on_target",
    "shots_on_target_pct",
    "shots_per_90",
    "shots_on_target_per_90",
    "goals_per_shot",
    "goals_per_shot_on_target",
    "avg_shot_distance",
    "free_kick_shots",
    "penalty_goals",
    "penalty_attempts",
    "expected_goals",
    "non_penalty_xg",
    "npxg_per_shot",
    "goals_minus_xg",
    "non_penalty_goals_minus_xg",
];

const PASSING_ORDER: &[&str] = &[
    "nineties_played",
    "passes_completed",
    "passes_attempted",
    "pass_completion_pct",
    "total_pass_distance",
    "progressive_pass_distance",
    "assists",
    "expected_assists",
    "expected_assisted_goals",
    "assists_minus_xag",
    "key_passes",
    "passes_into_final_third",
    "passes_into_penalty_area",
    "crosses_into_penalty_area",
    "progressive_passes",
];

const PASSING_TYPES_ORDER: &[&str] = &[
    "nineties_played",
    "passes_attempted",
    "passes_live",
    "passes_dead",
    "passes_free_kick",
    "passes_through_ball",
    "passes_switched",
    "passes_crosses",
    "passes_throw_in",
    "passes_corner_kick",
    "corner_kicks_inswinging",
    "corner_kicks_outswinging",
    "corner_kicks_straight",
    "passes_completed",
    "passes_offside",
    "passes_blocked",
];

const GCA_ORDER: &[&str] = &[
    "nineties_played",
    "shot_creating_actions",
    "shot_creating_actions_per_90",
    "sca_live_pass",
    "sca_dead_pass",
    "sca_take_on",
    "sca_shot",
    "sca_foul_drawn",
    "sca_defensive_action",
    "goal_creating_actions",
    "goal_creating_actions_per_90",
];

const DEFENSE_ORDER: &[&str] = &[
    "nineties_played",
    "tackles",
    "tackles_won",
    "tackles_def_third",
    "tackles_mid_third",
    "tackles_att_third",
    "challenges_attempted",
    "challenge_success_pct",
    "challenges_lost",
    "blocks",
    "blocked_shots",
    "blocked_passes",
    "interceptions",
    "tackles_plus_interceptions",
    "clearances",
    "errors",
];

const POSSESSION_ORDER: &[&str] = &[
    "nineties_played",
    "touches",
    "touches_def_pen",
    "touches_def_third",
    "touches_mid_third",
    "touches_att_third",
    "touches_att_pen",
    "touches_live",
    "take_ons_attempted",
    "take_ons_successful",
    "take_on_success_pct",
    "take_ons_tackled",
    "take_ons_tackled_pct",
    "carries",
    "carry_distance",
    "carry_progressive_distance",
    "progressive_carries",
    "carries_into_final_third",
    "carries_into_penalty_area",
    "miscontrols",
    "dispossessed",
    "passes_received",
    "progressive_receives",
];

const PLAYING_TIME_ORDER: &[&str] = &[
    "matches_played",
    "minutes",
    "minutes_per_match",
    "minutes_pct",
    "nineties_played",
    "starts",
    "minutes_per_start",
    "complete_matches",
    "substitute_appearances",
    "minutes_per_sub",
    "unused_sub",
    "points_per_match",
    "on_goals",
    "on_goals_against",
    "plus_minus",
    "plus_minus_per_90",
    "on_off",
    "on_expected_goals",
    "on_expected_goals_against",
    "expected_goals_plus_minus",
    "expected_goals_plus_minus_per_90",
];

const MISC_ORDER: &[&str] = &[
    "nineties_played",
    "yellow_cards",
    "red_cards",
    "second_yellow_cards",
    "fouls_committed",
    "fouls_drawn",
    "offsides",
    "crosses",
    "interceptions",
    "tackles_won",
    "penalties_won",
    "penalties_conceded",
    "own_goals",
    "ball_recoveries",
    "aerials_won",
    "aerials_lost",
    "aerial_win_pct",
];

const KEEPER_ORDER: &[&str] = &[
    "matches_played",
    "starts",
    "minutes",
    "nineties_played",
    "goals_against",
    "goals_against_per_90",
    "shots_on_target_against",
    "saves",
    "save_pct",
    "wins",
    "draws",
    "losses",
    "clean_sheets",
    "clean_sheet_pct",
    "penalty_kicks_faced",
    "penalty_goals_against",
    "penalty_saves",
    "penalty_kicks_missed",
];

const KEEPER_ADV_ORDER: &[&str] = &[
    "nineties_played",
    "goals_against",
    "penalty_goals_against",
    "free_kick_goals_against",
    "corner_kick_goals_against",
    "own_goals_against",
    "post_shot_expected_goals",
    "post_shot_xg_per_shot_on_target",
    "post_shot_xg_plus_minus",
    "post_shot_xg_plus_minus_per_90",
    "launches",
    "launches_attempted",
    "launch_completion_pct",
    "passes_attempted_gk",
    "throws_attempted",
    "launch_pct",
    "avg_pass_length",
    "crosses_faced",
    "crosses_stopped",
    "cross_stop_pct",
    "defensive_actions_outside_penalty_area",
    "defensive_actions_outside_penalty_area_per_90",
    "avg_defensive_action_distance",
];

/// Formatting variants seen across scrape runs.
const BUILTIN_PATTERNS: &[(&str, &[&str])] = &[
    ("player_name", &[r"(?i)^player(\s*name)?$"]),
    ("nation", &[r"(?i)^(nation|nationality)$"]),
    ("position", &[r"(?i)^(pos|position)$"]),
    ("squad", &[r"(?i)^(squad|team|club)$"]),
    ("competition", &[r"(?i)^(comp|competition|league)$"]),
    ("birth_year", &[r"(?i)^(born|birth\s*year)$"]),
    ("matches_played", &[r"(?i)^(mp|matches\s*played)$"]),
    ("minutes", &[r"(?i)^(min|mins|minutes)$"]),
    ("nineties_played", &[r"(?i)^90s(\s*played)?$"]),
    ("expected_goals", &[r"(?i)^x\s*g$"]),
    ("non_penalty_xg", &[r"(?i)^np\s*x\s*g$"]),
];

/// Ordered pairs decoded from a JSON or YAML mapping without losing the
/// document order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OrderedPairs<V>(pub Vec<(String, V)>);

impl<'de, V> Deserialize<'de> for OrderedPairs<V>
where
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PairsVisitor<V>(PhantomData<V>);

        impl<'de, V> Visitor<'de> for PairsVisitor<V>
        where
            V: Deserialize<'de>,
        {
            type Value = OrderedPairs<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, V>()? {
                    pairs.push((key, value));
                }
                Ok(OrderedPairs(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor(PhantomData))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDescription {
    Text(String),
    #[allow(dead_code)]
    Other(IgnoredAny),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlossaryEntry {
    pub header: String,
    pub section: String,
    pub description: String,
    pub type_hint: Option<SemanticType>,
}

/// Flattened `section -> header -> description` reference data.
#[derive(Debug, Clone, Default)]
pub struct Glossary {
    entries: HashMap<String, GlossaryEntry>,
    scoped: HashMap<(TableKind, String), String>,
    by_title: HashMap<String, String>,
}

impl Glossary {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::MissingGlossary(path.to_path_buf()).into());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Reading glossary from {path:?}"))?;
        let sections: OrderedPairs<OrderedPairs<RawDescription>> = if is_yaml(path) {
            serde_yaml::from_str(&text)
                .with_context(|| format!("Parsing YAML glossary {path:?}"))?
        } else {
            serde_json::from_str(&text)
                .with_context(|| format!("Parsing JSON glossary {path:?}"))?
        };

        let flattened = sections.0.into_iter().flat_map(|(section, headers)| {
            headers.0.into_iter().filter_map(move |(header, description)| match description {
                RawDescription::Text(text) => Some((section.clone(), header, text)),
                RawDescription::Other(_) => None,
            })
        });
        let glossary = Glossary::from_entries(flattened);
        debug!("Loaded {} glossary header(s) from {path:?}", glossary.len());
        Ok(glossary)
    }

    /// Build from `(section, header, description)` triples. The first
    /// non-empty description seen for a header is kept.
    pub fn from_entries<I, S, H, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, H, D)>,
        S: Into<String>,
        H: Into<String>,
        D: Into<String>,
    {
        let mut glossary = Glossary::default();
        for (section, header, description) in entries {
            let section = section.into();
            let header = normalize_header(&header.into());
            let description = description.into().trim().to_string();
            let key = header_key(&header);
            if key.is_empty() {
                continue;
            }

            if let Some(kind) = TableKind::from_table_name(&section) {
                if !description.is_empty() {
                    glossary
                        .scoped
                        .entry((kind, key.clone()))
                        .or_insert_with(|| description.clone());
                }
            }
            if !description.is_empty() {
                glossary
                    .by_title
                    .entry(description_title(&description))
                    .or_insert_with(|| description.clone());
            }

            match glossary.entries.get_mut(&key) {
                Some(existing) => {
                    if existing.description.is_empty() && !description.is_empty() {
                        existing.description = description;
                    }
                }
                None => {
                    let type_hint = guess_type_hint(&header, &description);
                    glossary.entries.insert(
                        key,
                        GlossaryEntry {
                            header,
                            section,
                            description,
                            type_hint,
                        },
                    );
                }
            }
        }
        glossary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, header: &str) -> Option<&GlossaryEntry> {
        self.entries.get(&header_key(header))
    }

    /// Description for a header, preferring the section of the given table
    /// kind, then any section, then a description whose title matches the
    /// canonical name.
    pub fn describe(
        &self,
        header: &str,
        kind: Option<TableKind>,
        canonical_name: &str,
    ) -> Option<String> {
        let key = header_key(header);
        kind.and_then(|kind| self.scoped.get(&(kind, key.clone())).cloned())
            .or_else(|| {
                self.entries
                    .get(&key)
                    .filter(|entry| !entry.description.is_empty())
                    .map(|entry| entry.description.clone())
            })
            .or_else(|| self.by_title.get(canonical_name).cloned())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"))
}

/// Snake-case form of the text before the first ` - ` or `:` of a glossary
/// description, e.g. `Passes Completed: ...` becomes `passes_completed`.
fn description_title(description: &str) -> String {
    let head = description
        .split(" - ")
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default();
    let mut title = String::with_capacity(head.len());
    for ch in head.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            title.push(ch);
        } else if !title.ends_with('_') {
            title.push('_');
        }
    }
    title.trim_matches('_').to_string()
}

/// Conservative type suggestion from header text and glossary description.
pub fn guess_type_hint(header: &str, description: &str) -> Option<SemanticType> {
    let lowered = header.to_lowercase();
    match name_hint(header) {
        NameHint::Identifier => return Some(SemanticType::Text),
        NameHint::Ratio => return Some(SemanticType::Real),
        NameHint::Count => return Some(SemanticType::Integer),
        NameHint::Neutral => {}
    }
    if lowered.contains("/90") || lowered.ends_with("90") {
        return Some(SemanticType::Real);
    }
    let desc = description.to_lowercase();
    if desc.contains("percent") || desc.contains("per 90") || desc.contains("ratio") {
        return Some(SemanticType::Real);
    }
    if desc.starts_with("number of") {
        return Some(SemanticType::Integer);
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    TableOverride,
    CanonicalPattern,
    Glossary,
    SuffixStripped,
    Synthesized,
}

/// Priority order, highest first. The first rule that produces a name wins.
pub const RESOLUTION_ORDER: [ResolutionRule; 5] = [
    ResolutionRule::TableOverride,
    ResolutionRule::CanonicalPattern,
    ResolutionRule::Glossary,
    ResolutionRule::SuffixStripped,
    ResolutionRule::Synthesized,
];

impl fmt::Display for ResolutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolutionRule::TableOverride => "table_override",
            ResolutionRule::CanonicalPattern => "canonical_pattern",
            ResolutionRule::Glossary => "glossary",
            ResolutionRule::SuffixStripped => "suffix_stripped",
            ResolutionRule::Synthesized => "synthesized",
        };
        f.write_str(label)
    }
}

/// Semantic identity of a statistic, shared across seasons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalColumn {
    pub canonical_name: String,
    pub preferred_type: SemanticType,
    pub description: Option<String>,
    pub origin_headers: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub raw_header: String,
    pub canonical_name: String,
    pub rule: ResolutionRule,
    pub description: Option<String>,
    pub type_hint: Option<SemanticType>,
}

impl Resolution {
    pub fn is_mapped(&self) -> bool {
        self.rule != ResolutionRule::Synthesized
    }

    pub fn to_column(&self) -> CanonicalColumn {
        CanonicalColumn {
            canonical_name: self.canonical_name.clone(),
            preferred_type: self.type_hint.unwrap_or(SemanticType::Text),
            description: self.description.clone(),
            origin_headers: BTreeSet::from([self.raw_header.clone()]),
        }
    }
}

#[derive(Debug, Clone)]
struct CanonicalPattern {
    canonical: String,
    regex: Regex,
}

#[derive(Debug, Clone)]
struct TableContext {
    name: String,
    kind: Option<TableKind>,
}

impl TableContext {
    fn new(table: &str) -> Self {
        Self {
            name: ident::sanitize_table_name(table),
            kind: TableKind::from_table_name(table),
        }
    }

    fn of_kind(kind: TableKind) -> Self {
        Self {
            name: kind.table_name().to_string(),
            kind: Some(kind),
        }
    }

    fn scope_key(&self) -> &str {
        self.kind.map(TableKind::table_name).unwrap_or(&self.name)
    }
}

fn scope_key_for(table: &str) -> String {
    TableKind::from_table_name(table)
        .map(|kind| kind.table_name().to_string())
        .unwrap_or_else(|| ident::sanitize_table_name(table))
}

/// Immutable header resolver built once per run.
#[derive(Debug, Clone)]
pub struct Resolver {
    glossary: Glossary,
    scoped: HashMap<String, HashMap<String, String>>,
    global: HashMap<String, String>,
    patterns: Vec<CanonicalPattern>,
    decoration: Regex,
    join_suffix: Regex,
    max_len: usize,
}

#[derive(Debug, Default)]
pub struct ResolverBuilder {
    glossary: Option<Glossary>,
    patterns: Vec<(String, Vec<String>)>,
    table_overrides: Vec<(String, String, String)>,
    max_len: Option<usize>,
}

impl ResolverBuilder {
    pub fn glossary(mut self, glossary: Glossary) -> Self {
        self.glossary = Some(glossary);
        self
    }

    /// Add `canonical -> [regex]` entries. They are tried before built-ins.
    pub fn patterns<I>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        self.patterns.extend(patterns);
        self
    }

    pub fn table_override(
        mut self,
        table: impl Into<String>,
        header: impl Into<String>,
        canonical: impl Into<String>,
    ) -> Self {
        self.table_overrides
            .push((table.into(), header.into(), canonical.into()));
        self
    }

    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn build(self) -> Result<Resolver> {
        let max_len = self.max_len.unwrap_or(IDENTIFIER_MAX_LEN);
        let mut resolver = Resolver::empty(max_len)?;
        resolver.glossary = self.glossary.unwrap_or_default();

        for (header, canonical) in GLOBAL_HEADERS {
            resolver
                .global
                .insert(header_key(header), (*canonical).to_string());
        }
        for kind in TableKind::ALL {
            let scope = resolver
                .scoped
                .entry(kind.table_name().to_string())
                .or_default();
            for (header, canonical) in kind.overrides() {
                scope.insert(header_key(header), (*canonical).to_string());
            }
        }
        for (table, header, canonical) in self.table_overrides {
            let canonical = ident::sanitize_with(&canonical, ident::IdentKind::Column, max_len);
            resolver
                .scoped
                .entry(scope_key_for(&table))
                .or_default()
                .insert(header_key(&header), canonical);
        }

        let builtin = BUILTIN_PATTERNS.iter().map(|(canonical, patterns)| {
            (
                (*canonical).to_string(),
                patterns.iter().map(|p| (*p).to_string()).collect::<Vec<_>>(),
            )
        });
        for (canonical, patterns) in self.patterns.into_iter().chain(builtin) {
            for pattern in patterns {
                let regex = Regex::new(&pattern).map_err(|source| ConfigError::InvalidPattern {
                    canonical: canonical.clone(),
                    pattern: pattern.clone(),
                    source,
                })?;
                resolver.patterns.push(CanonicalPattern {
                    canonical: ident::sanitize_with(&canonical, ident::IdentKind::Column, max_len),
                    regex,
                });
            }
        }
        Ok(resolver)
    }
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::default()
    }

    fn empty(max_len: usize) -> Result<Self> {
        Ok(Self {
            glossary: Glossary::default(),
            scoped: HashMap::new(),
            global: HashMap::new(),
            patterns: Vec::new(),
            decoration: Regex::new(r"^(.+?)\.\d+$")?,
            join_suffix: Regex::new(r"(?i)^(.+?)_(stats_[a-z0-9_]+)$")?,
            max_len,
        })
    }

    pub fn glossary(&self) -> &Glossary {
        &self.glossary
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Resolve a raw header in the context of a logical table. Never fails;
    /// the worst case is a synthesized, unmapped name.
    pub fn resolve(&self, raw_header: &str, table: &str) -> Resolution {
        let context = TableContext::new(table);
        self.resolve_in(raw_header, &context)
    }

    fn resolve_in(&self, raw_header: &str, context: &TableContext) -> Resolution {
        let header = normalize_header(raw_header);
        let key = header_key(&header);

        let (canonical_name, rule, kind) = RESOLUTION_ORDER
            .iter()
            .find_map(|rule| {
                self.apply(*rule, &header, &key, context)
                    .map(|(name, kind)| (name, *rule, kind))
            })
            .unwrap_or_else(|| (self.synthesize(&header), ResolutionRule::Synthesized, context.kind));

        let description = if rule == ResolutionRule::Synthesized {
            None
        } else {
            self.glossary.describe(&header, kind, &canonical_name)
        };
        let type_hint = self
            .glossary
            .entry(&header)
            .and_then(|entry| entry.type_hint)
            .or_else(|| guess_type_hint(&canonical_name, description.as_deref().unwrap_or("")));

        debug!(
            "Resolved '{}' in {} to {} via {}",
            raw_header, context.name, canonical_name, rule
        );
        Resolution {
            raw_header: raw_header.to_string(),
            canonical_name,
            rule,
            description,
            type_hint,
        }
    }

    fn apply(
        &self,
        rule: ResolutionRule,
        header: &str,
        key: &str,
        context: &TableContext,
    ) -> Option<(String, Option<TableKind>)> {
        match rule {
            ResolutionRule::TableOverride => self
                .scoped
                .get(context.scope_key())
                .and_then(|scope| scope.get(key))
                .map(|name| (name.clone(), context.kind)),
            ResolutionRule::CanonicalPattern => self
                .patterns
                .iter()
                .find(|pattern| pattern.regex.is_match(header))
                .map(|pattern| (pattern.canonical.clone(), context.kind)),
            ResolutionRule::Glossary => self
                .global
                .get(key)
                .cloned()
                .or_else(|| self.glossary.entry(header).map(|entry| self.synthesize(&entry.header)))
                .map(|name| (name, context.kind)),
            ResolutionRule::SuffixStripped => self.strip_suffix(header, context),
            ResolutionRule::Synthesized => None,
        }
    }

    /// Strip a pandas duplicate decoration (`Gls.1`) or a join suffix
    /// (`xG_stats_shooting`) and resolve the base. A join suffix naming a
    /// known table moves resolution into that table's context.
    fn strip_suffix(
        &self,
        header: &str,
        context: &TableContext,
    ) -> Option<(String, Option<TableKind>)> {
        let (base, base_context) = if let Some(caps) = self.decoration.captures(header) {
            (caps.get(1)?.as_str().to_string(), context.clone())
        } else if let Some(caps) = self.join_suffix.captures(header) {
            let base = caps.get(1)?.as_str().to_string();
            let suffix_context = TableKind::from_table_name(caps.get(2)?.as_str())
                .map(TableContext::of_kind)
                .unwrap_or_else(|| context.clone());
            (base, suffix_context)
        } else {
            return None;
        };

        let resolved = self.resolve_in(&base, &base_context);
        resolved
            .is_mapped()
            .then_some((resolved.canonical_name, base_context.kind))
    }

    fn synthesize(&self, header: &str) -> String {
        ident::sanitize_with(header, ident::IdentKind::Column, self.max_len)
    }
}

/// Load `canonical -> [patterns]` from a JSON or YAML file, keeping order.
pub fn load_patterns(path: &Path) -> Result<Vec<(String, Vec<String>)>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Reading canonical patterns from {path:?}"))?;
    let pairs: OrderedPairs<Vec<String>> = if is_yaml(path) {
        serde_yaml::from_str(&text).with_context(|| format!("Parsing YAML patterns {path:?}"))?
    } else {
        serde_json::from_str(&text).with_context(|| format!("Parsing JSON patterns {path:?}"))?
    };
    Ok(pairs.0)
}
