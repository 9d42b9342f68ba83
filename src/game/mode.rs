//! Game Mode and Scoring
//!
//! Grace period, match timer and elimination end conditions, plus the
//! leaderboard shown by the scoreboard overlay.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::game::entity::{Entity, EntityId, Team};

/// Mode rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    /// Free-for-all, ranked by score, respawns enabled
    Solo,
    /// Free-for-all, last player standing
    SoloElimination,
    /// Two teams, ranked by score, respawns enabled
    Team,
    /// Two teams, last team standing
    TeamElimination,
}

impl ModeKind {
    /// Players are split into teams.
    pub fn is_team(self) -> bool {
        matches!(self, ModeKind::Team | ModeKind::TeamElimination)
    }

    /// Dead players stay dead.
    pub fn is_elimination(self) -> bool {
        matches!(self, ModeKind::SoloElimination | ModeKind::TeamElimination)
    }

    /// Parse a config value such as `team_elimination`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solo" => Some(ModeKind::Solo),
            "solo_elimination" => Some(ModeKind::SoloElimination),
            "team" => Some(ModeKind::Team),
            "team_elimination" => Some(ModeKind::TeamElimination),
            _ => None,
        }
    }
}

/// Match phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Before `grace_end`; no damage is dealt
    Grace,
    /// Normal play
    Active,
    /// Match over
    Ended,
}

/// One leaderboard row: `(value, team, label)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Score or eliminations
    pub value: u32,
    /// Team, for team modes
    pub team: Option<Team>,
    /// Player name or team label
    pub label: String,
}

/// Game mode state machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameMode {
    /// Rules
    pub kind: ModeKind,
    /// World time at which the grace period ends
    pub grace_end: f64,
    /// World time at which the match ends, if timed
    pub match_end: Option<f64>,
    /// Current phase
    pub phase: MatchPhase,
}

impl Default for GameMode {
    fn default() -> Self {
        Self::new(ModeKind::Solo, 0.0, None)
    }
}

impl GameMode {
    /// Create a mode starting in the grace period.
    pub fn new(kind: ModeKind, grace_end: f64, match_end: Option<f64>) -> Self {
        Self { kind, grace_end, match_end, phase: MatchPhase::Grace }
    }

    /// Damage is only dealt while active.
    #[inline]
    pub fn combat_enabled(&self) -> bool {
        self.phase == MatchPhase::Active
    }

    /// Advance the phase. Returns the new phase if it changed.
    pub fn update(&mut self, now: f64, entities: &BTreeMap<EntityId, Entity>) -> Option<MatchPhase> {
        let next = match self.phase {
            MatchPhase::Grace if now >= self.grace_end => MatchPhase::Active,
            MatchPhase::Active if self.match_end.map_or(false, |end| now >= end) => MatchPhase::Ended,
            MatchPhase::Active if self.elimination_decided(entities) => MatchPhase::Ended,
            phase => phase,
        };
        if next != self.phase {
            self.phase = next;
            Some(next)
        } else {
            None
        }
    }

    /// At most one player (solo) or team (team) is still standing.
    fn elimination_decided(&self, entities: &BTreeMap<EntityId, Entity>) -> bool {
        if !self.kind.is_elimination() {
            return false;
        }
        let players = entities.values().filter(|e| e.is_player());
        if self.kind.is_team() {
            let mut teams = BTreeMap::<Team, bool>::new();
            for p in players {
                if let Some(team) = p.team {
                    *teams.entry(team).or_insert(false) |= p.alive;
                }
            }
            teams.len() >= 2 && teams.values().filter(|alive| **alive).count() <= 1
        } else {
            let (total, alive) = players.fold((0, 0), |(t, a), p| (t + 1, a + usize::from(p.alive)));
            total >= 2 && alive <= 1
        }
    }

    /// Sorted leaderboard, highest value first.
    ///
    /// Plain modes rank by score, elimination modes by eliminations. Team
    /// modes aggregate their players into one row per team.
    pub fn leaderboard(&self, entities: &BTreeMap<EntityId, Entity>) -> Vec<LeaderboardEntry> {
        let value_of = |e: &Entity| {
            if self.kind.is_elimination() {
                e.eliminations
            } else {
                e.score
            }
        };

        let mut rows: Vec<LeaderboardEntry> = if self.kind.is_team() {
            let mut totals = BTreeMap::<Team, u32>::new();
            for p in entities.values().filter(|e| e.is_player()) {
                if let Some(team) = p.team {
                    *totals.entry(team).or_insert(0) += value_of(p);
                }
            }
            totals
                .into_iter()
                .map(|(team, value)| LeaderboardEntry {
                    value,
                    team: Some(team),
                    label: team.label().to_string(),
                })
                .collect()
        } else {
            entities
                .values()
                .filter_map(|e| {
                    e.name().map(|name| LeaderboardEntry {
                        value: value_of(e),
                        team: e.team,
                        label: name.to_string(),
                    })
                })
                .collect()
        };

        rows.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Point;

    fn registry(players: Vec<Entity>) -> BTreeMap<EntityId, Entity> {
        players
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                p.id = i as EntityId + 1;
                (p.id, p)
            })
            .collect()
    }

    #[test]
    fn test_grace_then_active_then_timed_end() {
        let mut mode = GameMode::new(ModeKind::Solo, 3.0, Some(10.0));
        let entities = BTreeMap::new();
        assert!(!mode.combat_enabled());
        assert_eq!(mode.update(1.0, &entities), None);
        assert_eq!(mode.update(3.0, &entities), Some(MatchPhase::Active));
        assert!(mode.combat_enabled());
        assert_eq!(mode.update(9.0, &entities), None);
        assert_eq!(mode.update(10.0, &entities), Some(MatchPhase::Ended));
    }

    #[test]
    fn test_solo_elimination_ends_with_one_survivor() {
        let mut mode = GameMode::new(ModeKind::SoloElimination, 0.0, None);
        let mut a = Entity::player("a", Point::ZERO, None);
        let b = Entity::player("b", Point::ZERO, None);
        a.death();
        let entities = registry(vec![a, b]);
        assert_eq!(mode.update(0.0, &entities), Some(MatchPhase::Active));
        assert_eq!(mode.update(0.1, &entities), Some(MatchPhase::Ended));
    }

    #[test]
    fn test_team_elimination_needs_two_teams() {
        let mut mode = GameMode::new(ModeKind::TeamElimination, 0.0, None);
        mode.update(0.0, &BTreeMap::new());

        let lonely = registry(vec![Entity::player("a", Point::ZERO, Some(Team::Red))]);
        assert_eq!(mode.update(1.0, &lonely), None);

        let mut blue = Entity::player("b", Point::ZERO, Some(Team::Blue));
        blue.death();
        let decided = registry(vec![Entity::player("a", Point::ZERO, Some(Team::Red)), blue]);
        assert_eq!(mode.update(2.0, &decided), Some(MatchPhase::Ended));
    }

    #[test]
    fn test_leaderboard_solo_by_score() {
        let mode = GameMode::new(ModeKind::Solo, 0.0, None);
        let mut a = Entity::player("alice", Point::ZERO, None);
        let mut b = Entity::player("bob", Point::ZERO, None);
        a.score = 5;
        b.score = 20;
        let mut barrel = Entity::barrel_short(Point::ZERO);
        barrel.score = 100;
        let board = mode.leaderboard(&registry(vec![a, b, barrel]));
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].label, "bob");
        assert_eq!(board[0].value, 20);
    }

    #[test]
    fn test_leaderboard_team_elimination_aggregates() {
        let mode = GameMode::new(ModeKind::TeamElimination, 0.0, None);
        let mut a = Entity::player("a", Point::ZERO, Some(Team::Red));
        let mut b = Entity::player("b", Point::ZERO, Some(Team::Red));
        let mut c = Entity::player("c", Point::ZERO, Some(Team::Blue));
        a.eliminations = 1;
        b.eliminations = 2;
        c.eliminations = 4;
        c.score = 0;
        let board = mode.leaderboard(&registry(vec![a, b, c]));
        assert_eq!(
            board,
            vec![
                LeaderboardEntry { value: 4, team: Some(Team::Blue), label: "blue".into() },
                LeaderboardEntry { value: 3, team: Some(Team::Red), label: "red".into() },
            ]
        );
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(ModeKind::parse("Team_Elimination"), Some(ModeKind::TeamElimination));
        assert_eq!(ModeKind::parse("capture"), None);
    }
}
