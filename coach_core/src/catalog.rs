//! Default catalog of tracked exercises and their levels.
//!
//! The catalog is owned by an external store in production; this module
//! provides the built-in seed data the in-memory store and simulator use.

use crate::types::*;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Exercise id for push-ups in the default catalog
pub const PUSHUP_ID: ExerciseId = 1;

/// Exercise id for squats in the default catalog
pub const SQUAT_ID: ExerciseId = 2;

/// Highest seeded level per exercise
pub const MAX_LEVEL: u32 = 5;

/// The complete catalog of exercises and levels
#[derive(Clone, Debug)]
pub struct ExerciseCatalog {
    pub exercises: HashMap<ExerciseId, Exercise>,
    pub levels: HashMap<(ExerciseId, u32), ExerciseLevel>,
}

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<ExerciseCatalog> = Lazy::new(build_default_catalog);

/// Get a reference to the cached default catalog
pub fn default_catalog() -> &'static ExerciseCatalog {
    &DEFAULT_CATALOG
}

/// Builds the default catalog with both tracked exercises and their levels
///
/// **Note**: Prefer `default_catalog()` which returns a cached reference.
/// This function is retained for testing and custom catalog creation.
pub fn build_default_catalog() -> ExerciseCatalog {
    let mut exercises = HashMap::new();
    let mut levels = HashMap::new();

    exercises.insert(
        PUSHUP_ID,
        Exercise {
            id: PUSHUP_ID,
            name: "Push-up".into(),
            kind: ExerciseKind::Pushup,
            calories_per_rep: 4.5,
        },
    );

    exercises.insert(
        SQUAT_ID,
        Exercise {
            id: SQUAT_ID,
            name: "Squat".into(),
            kind: ExerciseKind::Squat,
            calories_per_rep: 6.0,
        },
    );

    // Levels scale reps linearly and award experience per level
    for exercise_id in [PUSHUP_ID, SQUAT_ID] {
        for level in 1..=MAX_LEVEL {
            levels.insert(
                (exercise_id, level),
                ExerciseLevel {
                    exercise_id,
                    level,
                    target_sets: 3,
                    target_reps: 3 + (level - 1),
                    rest_seconds: 10,
                    experience_points: 10 * level,
                },
            );
        }
    }

    ExerciseCatalog { exercises, levels }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_exercises_present() {
        let catalog = build_default_catalog();
        assert_eq!(catalog.exercises.len(), 2);
        assert_eq!(
            catalog.exercises[&PUSHUP_ID].kind,
            ExerciseKind::Pushup
        );
        assert_eq!(catalog.exercises[&SQUAT_ID].kind, ExerciseKind::Squat);
    }

    #[test]
    fn test_levels_scale_with_level() {
        let catalog = build_default_catalog();

        let l1 = &catalog.levels[&(PUSHUP_ID, 1)];
        let l3 = &catalog.levels[&(PUSHUP_ID, 3)];

        assert_eq!(l1.target_reps, 3);
        assert_eq!(l3.target_reps, 5);
        assert_eq!(l3.experience_points, 30);
        assert_eq!(l1.target_sets, l3.target_sets);
    }

    #[test]
    fn test_every_exercise_has_all_levels() {
        let catalog = build_default_catalog();
        for id in catalog.exercises.keys() {
            for level in 1..=MAX_LEVEL {
                assert!(catalog.levels.contains_key(&(*id, level)));
            }
        }
    }
}
