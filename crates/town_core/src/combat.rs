//! Hit and damage resolution.
//!
//! Every function here is pure: it reads two characters, draws from the
//! supplied random source, and reports what happened. Callers apply damage and
//! status transitions.

use rand::Rng;

use crate::world::{Character, CharacterId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Strike {
    pub hit: bool,
    pub damage: u32,
    pub narrative_input: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuelRound {
    pub first_shooter: CharacterId,
    pub second_shooter: CharacterId,
    pub first_damage: u32,
    /// Only applied when the second shooter survives the first shot.
    pub second_damage: u32,
    pub narrative_input: String,
}

/// Percent chance for `attacker` to land a gunshot.
pub fn shooting_hit_chance(attacker: &Character) -> i32 {
    60 + 3 * i32::from(attacker.stats.grit) - 5 * i32::from(attacker.intoxication)
}

/// Percent chance for `attacker` to land a punch.
pub fn punch_hit_chance(attacker: &Character) -> i32 {
    70 + 2 * i32::from(attacker.stats.grit) - 4 * i32::from(attacker.intoxication)
}

fn lands<R: Rng + ?Sized>(chance: i32, rng: &mut R) -> bool {
    let roll: f64 = rng.gen_range(0.0..100.0);
    roll <= f64::from(chance)
}

pub fn resolve_shooting<R: Rng + ?Sized>(
    attacker: &Character,
    defender: &Character,
    rng: &mut R,
) -> Strike {
    if !lands(shooting_hit_chance(attacker), rng) {
        return Strike {
            hit: false,
            damage: 0,
            narrative_input: format!(
                "{} fires at {} but the shot goes wide",
                attacker.name, defender.name
            ),
        };
    }

    let damage = rng.gen_range(0..16) + 15 + 2 * u32::from(attacker.stats.grit);
    let severity = match damage {
        d if d > 25 => "grievously",
        d if d > 18 => "badly",
        _ => "grazed",
    };
    Strike {
        hit: true,
        damage,
        narrative_input: format!(
            "{}'s bullet finds {}, {} wounded",
            attacker.name, defender.name, severity
        ),
    }
}

pub fn resolve_punch<R: Rng + ?Sized>(
    attacker: &Character,
    defender: &Character,
    rng: &mut R,
) -> Strike {
    if !lands(punch_hit_chance(attacker), rng) {
        return Strike {
            hit: false,
            damage: 0,
            narrative_input: format!("{} swings at {} but misses", attacker.name, defender.name),
        };
    }

    let damage = rng.gen_range(0..11) + 5 + u32::from(attacker.stats.grit);
    let blow = match damage {
        d if d > 12 => "a solid blow",
        d if d > 8 => "a decent hit",
        _ => "a glancing blow",
    };
    Strike {
        hit: true,
        damage,
        narrative_input: format!("{} lands {} on {}", attacker.name, blow, defender.name),
    }
}

fn draw_speed<R: Rng + ?Sized>(duelist: &Character, rng: &mut R) -> f64 {
    2.0 * f64::from(duelist.stats.grit) + 1.5 * f64::from(duelist.stats.luck)
        - 3.0 * f64::from(duelist.intoxication)
        + rng.gen_range(0.0..10.0)
}

fn duel_damage<R: Rng + ?Sized>(shooter: &Character, rng: &mut R) -> u32 {
    20 + 3 * u32::from(shooter.stats.grit) + rng.gen_range(0..15) + 1
}

/// One exchange of fire. Ties on draw speed go to `first`.
pub fn resolve_duel_round<R: Rng + ?Sized>(
    first: &Character,
    second: &Character,
    rng: &mut R,
) -> DuelRound {
    let speed_first = draw_speed(first, rng);
    let speed_second = draw_speed(second, rng);
    let (quick, slow) = if speed_first >= speed_second {
        (first, second)
    } else {
        (second, first)
    };

    let first_damage = duel_damage(quick, rng);
    let second_damage = duel_damage(slow, rng);
    DuelRound {
        first_shooter: quick.id,
        second_shooter: slow.id,
        first_damage,
        second_damage,
        narrative_input: format!("{} draws first", quick.name),
    }
}

/// Whether any inventory token looks like ammunition.
pub fn has_ammo(inventory: &[String]) -> bool {
    inventory.iter().any(|item| {
        let item = item.to_lowercase();
        item.contains("bullet") || item.contains("ammo")
    })
}

/// Parse a counted bullet token such as `"6 bullets"` or `"1 bullet"`.
fn bullet_count(item: &str) -> Option<u32> {
    let item = item.trim();
    let digits_end = item.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let (count, rest) = item.split_at(digits_end);
    let unit = rest.trim_start().to_lowercase();
    if unit == "bullet" || unit == "bullets" {
        count.parse().ok()
    } else {
        None
    }
}

/// Spend one round from the first counted bullet token, dropping the token when
/// it runs out. Everything else keeps its value and position.
pub fn deduct_ammo(inventory: &[String]) -> Vec<String> {
    let mut next = inventory.to_vec();
    let Some((index, count)) = next
        .iter()
        .enumerate()
        .find_map(|(i, item)| bullet_count(item).map(|n| (i, n)))
    else {
        return next;
    };

    match count {
        0 | 1 => {
            next.remove(index);
        }
        2 => next[index] = "1 bullet".to_string(),
        n => next[index] = format!("{} bullets", n - 1),
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Role, RoomId, Stats};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gunman(id: u64, grit: u8, luck: u8) -> Character {
        Character::new(
            CharacterId(id),
            format!("Gunman {id}"),
            Role::Gunslinger,
            Stats::new(grit, 5, 5, luck),
            RoomId::new("street"),
        )
    }

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn deduct_ammo_counts_down() {
        assert_eq!(deduct_ammo(&tokens(&["6 bullets"])), tokens(&["5 bullets"]));
        assert_eq!(deduct_ammo(&tokens(&["2 bullets"])), tokens(&["1 bullet"]));
        assert!(deduct_ammo(&tokens(&["1 bullet"])).is_empty());
    }

    #[test]
    fn deduct_ammo_leaves_other_items_in_place() {
        let before = tokens(&["revolver", "12 Bullets", "rope", "6 bullets"]);
        assert_eq!(
            deduct_ammo(&before),
            tokens(&["revolver", "11 bullets", "rope", "6 bullets"])
        );
        let unarmed = tokens(&["bible", "revolver"]);
        assert_eq!(deduct_ammo(&unarmed), unarmed);
    }

    #[test]
    fn ammo_detection_matches_bullets_and_ammo() {
        assert!(has_ammo(&tokens(&["revolver", "6 bullets"])));
        assert!(has_ammo(&tokens(&["ammo belt"])));
        assert!(!has_ammo(&tokens(&["bible", "revolver"])));
    }

    #[test]
    fn hit_chance_falls_with_drink() {
        let mut drunk = gunman(1, 5, 5);
        assert_eq!(shooting_hit_chance(&drunk), 75);
        assert_eq!(punch_hit_chance(&drunk), 80);
        drunk.intoxication = 10;
        assert_eq!(shooting_hit_chance(&drunk), 25);
        assert_eq!(punch_hit_chance(&drunk), 40);
    }

    #[test]
    fn misses_deal_no_damage() {
        let mut attacker = gunman(1, 1, 1);
        attacker.intoxication = 10;
        let defender = gunman(2, 5, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let misses: Vec<Strike> = (0..200)
            .map(|_| resolve_shooting(&attacker, &defender, &mut rng))
            .filter(|s| !s.hit)
            .collect();
        assert!(!misses.is_empty());
        assert!(misses.iter().all(|s| s.damage == 0));
    }

    #[test]
    fn duel_tie_breaks_toward_first_listed() {
        let a = gunman(1, 5, 5);
        let b = gunman(2, 5, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..50 {
            let round = resolve_duel_round(&a, &b, &mut rng);
            assert_ne!(round.first_shooter, round.second_shooter);
        }
    }

    proptest! {
        #[test]
        fn grit_five_shot_damage_in_range(seed in any::<u64>()) {
            let attacker = gunman(1, 5, 5);
            let defender = gunman(2, 5, 5);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let strike = resolve_shooting(&attacker, &defender, &mut rng);
            if strike.hit {
                prop_assert!((25..=40).contains(&strike.damage));
            }
        }

        #[test]
        fn punch_damage_in_range(seed in any::<u64>(), grit in 1u8..=10) {
            let attacker = gunman(1, grit, 5);
            let defender = gunman(2, 5, 5);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let strike = resolve_punch(&attacker, &defender, &mut rng);
            if strike.hit {
                let low = 5 + u32::from(grit);
                prop_assert!((low..=low + 10).contains(&strike.damage));
            }
        }

        #[test]
        fn grit_five_duel_first_shot_in_range(seed in any::<u64>()) {
            let a = gunman(1, 5, 5);
            let b = gunman(2, 5, 5);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let round = resolve_duel_round(&a, &b, &mut rng);
            prop_assert!((36..=50).contains(&round.first_damage));
            prop_assert!((36..=50).contains(&round.second_damage));
        }
    }
}
