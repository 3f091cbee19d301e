//! Direction helpers for the decision rules. All vectors are image space (y down).

use crate::geometry::Vec2;
use crate::state::Observed;

/// Away from the frame edge closest to `player`. Up when the frame size is unknown.
pub fn away_from_nearest_edge(player: Vec2, width: u32, height: u32) -> Vec2 {
    if width == 0 || height == 0 {
        return Vec2::UP;
    }
    let (w, h) = (width as f32, height as f32);
    let candidates = [
        (player.x, Vec2::new(1.0, 0.0)),
        (w - player.x, Vec2::new(-1.0, 0.0)),
        (player.y, Vec2::new(0.0, 1.0)),
        (h - player.y, Vec2::new(0.0, -1.0)),
    ];
    let mut best = candidates[0];
    for c in &candidates[1..] {
        if c.0 < best.0 {
            best = *c;
        }
    }
    best.1
}

/// Inverse-distance weighted escape direction from `threats`.
///
/// A threat sitting exactly on the player has no direction of its own and makes the
/// escape head away from the nearest edge. When the weighted vectors cancel out, the
/// escape is directly away from the nearest threat, and failing that, up.
pub fn flee_direction(player: Vec2, threats: &[&Observed], width: u32, height: u32) -> Vec2 {
    let mut sum = Vec2::ZERO;
    for threat in threats {
        let away = player - threat.center();
        match away.normalized() {
            Some(unit) => sum = sum + unit.scale(1.0 / away.length()),
            None => return away_from_nearest_edge(player, width, height),
        }
    }
    if let Some(dir) = sum.normalized() {
        return dir;
    }
    threats
        .iter()
        .min_by(|a, b| a.distance_px.total_cmp(&b.distance_px))
        .and_then(|nearest| (player - nearest.center()).normalized())
        .unwrap_or(Vec2::UP)
}

/// Distance from `point` to the closest frame edge. Negative outside the frame.
fn edge_clearance(point: Vec2, width: u32, height: u32) -> f32 {
    let (w, h) = (width as f32, height as f32);
    point.x.min(w - point.x).min(point.y).min(h - point.y)
}

/// Rotation sign for circle strafing around `enemy`.
///
/// Picks the perpendicular whose look-ahead point keeps the most room to the frame
/// edge. Near-equal clearances keep `previous`.
pub fn strafe_sign(
    player: Vec2,
    enemy: Vec2,
    previous: i8,
    lookahead_px: f32,
    width: u32,
    height: u32,
) -> i8 {
    let Some(to_enemy) = (enemy - player).normalized() else {
        return previous;
    };
    if width == 0 || height == 0 {
        return previous;
    }
    let clearance = |sign: i8| {
        edge_clearance(
            player + to_enemy.perpendicular(sign).scale(lookahead_px),
            width,
            height,
        )
    };
    let (cw, ccw) = (clearance(1), clearance(-1));
    if (cw - ccw).abs() < 0.5 {
        previous
    } else if cw > ccw {
        1
    } else {
        -1
    }
}
