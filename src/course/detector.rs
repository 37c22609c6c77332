use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::Serialize;

use super::types::CourseGeometry;
use crate::geo::distance;
use crate::position::GpsFix;

/// A fix must be this close to a tee to nominate that hole.
pub const TEE_CAPTURE_RADIUS_M: f64 = 80.0;
pub const NEAR_GREEN_RADIUS_M: f64 = 30.0;
/// Consecutive nominations needed before the current hole switches.
pub const HYSTERESIS_COUNT: u32 = 2;
pub const MANUAL_OVERRIDE: Duration = Duration::minutes(3);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoleDetectionState {
    pub current_hole: u32,
    pub near_green: bool,
    pub candidate_hole: Option<u32>,
    pub candidate_count: u32,
    pub manual_override_hole: Option<u32>,
    pub manual_override_expiry: Option<DateTime<Utc>>,
}

/// What callers see after each update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HoleStatus {
    pub current_hole: u32,
    pub near_green: bool,
}

pub struct HoleDetector {
    state: HoleDetectionState,
}

impl HoleDetector {
    pub fn new(course: &CourseGeometry) -> Self {
        Self::starting_at(course.first_hole().unwrap_or(1))
    }

    pub fn starting_at(hole: u32) -> Self {
        Self {
            state: HoleDetectionState {
                current_hole: hole,
                near_green: false,
                candidate_hole: None,
                candidate_count: 0,
                manual_override_hole: None,
                manual_override_expiry: None,
            },
        }
    }

    pub fn state(&self) -> &HoleDetectionState {
        &self.state
    }

    pub fn status(&self) -> HoleStatus {
        HoleStatus {
            current_hole: self.state.current_hole,
            near_green: self.state.near_green,
        }
    }

    pub fn set_manual_hole(&mut self, hole: u32, now: DateTime<Utc>) -> HoleStatus {
        info!("Manual hole selection: {}", hole);
        self.state.current_hole = hole;
        self.state.manual_override_hole = Some(hole);
        self.state.manual_override_expiry = Some(now + MANUAL_OVERRIDE);
        self.clear_candidate();
        self.status()
    }

    pub fn on_fix(&mut self, fix: &GpsFix, course: &CourseGeometry, now: DateTime<Utc>) -> HoleStatus {
        if !self.override_active(now) {
            self.detect(fix, course);
        }

        self.state.near_green = course
            .hole(self.state.current_hole)
            .and_then(|h| h.green)
            .is_some_and(|green| distance(fix.point(), green) <= NEAR_GREEN_RADIUS_M);

        self.status()
    }

    /// Drops an expired override and resets the candidate so detection
    /// restarts from scratch.
    fn override_active(&mut self, now: DateTime<Utc>) -> bool {
        match self.state.manual_override_expiry {
            Some(expiry) if now < expiry => true,
            Some(_) => {
                debug!("Manual hole override expired");
                self.state.manual_override_hole = None;
                self.state.manual_override_expiry = None;
                self.clear_candidate();
                false
            }
            None => false,
        }
    }

    fn detect(&mut self, fix: &GpsFix, course: &CourseGeometry) {
        let nearest = course
            .holes
            .iter()
            .filter_map(|h| h.tee.map(|tee| (h.number, distance(fix.point(), tee))))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let candidate = match nearest {
            Some((hole, d)) if d <= TEE_CAPTURE_RADIUS_M => hole,
            // A fix with no candidate breaks the run of consecutive nominations.
            _ => {
                self.clear_candidate();
                return;
            }
        };

        if self.state.candidate_hole == Some(candidate) {
            self.state.candidate_count += 1;
        } else {
            self.state.candidate_hole = Some(candidate);
            self.state.candidate_count = 1;
        }

        if self.state.candidate_count >= HYSTERESIS_COUNT && candidate != self.state.current_hole {
            info!("Hole {} -> {}", self.state.current_hole, candidate);
            self.state.current_hole = candidate;
            self.clear_candidate();
        }
    }

    fn clear_candidate(&mut self) {
        self.state.candidate_hole = None;
        self.state.candidate_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::Hole;
    use crate::geo::{destination, LatLng};

    /// Three holes laid out 300 m apart going north.
    fn course() -> CourseGeometry {
        let origin = LatLng::new(52.0, 4.0);
        let holes = (1..=3)
            .map(|n| {
                let tee = destination(origin, 300.0 * (n - 1) as f64, 0.0);
                let green = destination(tee, 150.0, 1.5);
                Hole::new(n, Some(tee), Some(green))
            })
            .collect();
        CourseGeometry::new(holes)
    }

    fn fix_at(point: LatLng) -> GpsFix {
        GpsFix {
            lat: point.lat,
            lng: point.lng,
            accuracy: 4.0,
            timestamp: Utc::now(),
        }
    }

    fn near_tee(course: &CourseGeometry, hole: u32) -> GpsFix {
        let tee = course.hole(hole).unwrap().tee.unwrap();
        fix_at(destination(tee, 10.0, 0.7))
    }

    #[test]
    fn two_consecutive_fixes_switch_the_hole() {
        let course = course();
        let mut detector = HoleDetector::new(&course);
        let now = Utc::now();

        assert_eq!(detector.on_fix(&near_tee(&course, 2), &course, now).current_hole, 1);
        assert_eq!(detector.on_fix(&near_tee(&course, 2), &course, now).current_hole, 2);
        assert_eq!(detector.state().candidate_hole, None);
        assert_eq!(detector.state().candidate_count, 0);
    }

    #[test]
    fn interleaved_candidate_does_not_switch() {
        let course = course();
        let mut detector = HoleDetector::new(&course);
        let now = Utc::now();

        detector.on_fix(&near_tee(&course, 2), &course, now);
        detector.on_fix(&near_tee(&course, 3), &course, now);
        let status = detector.on_fix(&near_tee(&course, 2), &course, now);
        assert_eq!(status.current_hole, 1);
        assert_eq!(detector.state().candidate_count, 1);
    }

    #[test]
    fn alternating_candidates_never_reach_the_threshold() {
        let course = course();
        let mut detector = HoleDetector::new(&course);
        let now = Utc::now();

        for i in 0..10 {
            let hole = if i % 2 == 0 { 2 } else { 3 };
            detector.on_fix(&near_tee(&course, hole), &course, now);
        }
        assert_eq!(detector.status().current_hole, 1);
    }

    #[test]
    fn far_fix_breaks_the_run() {
        let course = course();
        let mut detector = HoleDetector::new(&course);
        let now = Utc::now();
        let far = fix_at(LatLng::new(53.0, 4.0));

        detector.on_fix(&near_tee(&course, 2), &course, now);
        detector.on_fix(&far, &course, now);
        assert_eq!(detector.state().candidate_hole, None);
        detector.on_fix(&near_tee(&course, 2), &course, now);
        assert_eq!(detector.status().current_hole, 1);
    }

    #[test]
    fn fix_beyond_capture_radius_is_not_a_candidate() {
        let course = course();
        let mut detector = HoleDetector::new(&course);
        let tee = course.hole(2).unwrap().tee.unwrap();
        // 120 m west of tee 2 is still more than 80 m from every tee
        let fix = fix_at(destination(tee, 120.0, -std::f64::consts::FRAC_PI_2));
        let now = Utc::now();

        detector.on_fix(&fix, &course, now);
        detector.on_fix(&fix, &course, now);
        assert_eq!(detector.status().current_hole, 1);
    }

    #[test]
    fn holes_without_a_tee_are_skipped() {
        let mut course = course();
        course.holes[1].tee = None;
        let mut detector = HoleDetector::new(&course);
        let now = Utc::now();
        let tee3 = course.hole(3).unwrap().tee.unwrap();

        detector.on_fix(&fix_at(tee3), &course, now);
        assert_eq!(detector.on_fix(&fix_at(tee3), &course, now).current_hole, 3);
    }

    #[test]
    fn manual_override_blocks_detection_until_expiry() {
        let course = course();
        let mut detector = HoleDetector::starting_at(3);
        let now = Utc::now();

        assert_eq!(detector.set_manual_hole(1, now).current_hole, 1);
        detector.on_fix(&near_tee(&course, 2), &course, now + Duration::seconds(5));
        let status = detector.on_fix(&near_tee(&course, 2), &course, now + Duration::seconds(10));
        assert_eq!(status.current_hole, 1);
        assert_eq!(detector.state().candidate_hole, None);

        let later = now + MANUAL_OVERRIDE + Duration::seconds(1);
        detector.on_fix(&near_tee(&course, 2), &course, later);
        assert_eq!(detector.state().manual_override_hole, None);
        assert_eq!(detector.state().candidate_count, 1);
        let status = detector.on_fix(&near_tee(&course, 2), &course, later);
        assert_eq!(status.current_hole, 2);
    }

    #[test]
    fn near_green_tracks_the_current_hole() {
        let course = course();
        let mut detector = HoleDetector::new(&course);
        let now = Utc::now();
        let green1 = course.hole(1).unwrap().green.unwrap();

        let status = detector.on_fix(&fix_at(destination(green1, 20.0, 0.0)), &course, now);
        assert!(status.near_green);
        let status = detector.on_fix(&fix_at(destination(green1, 40.0, 0.0)), &course, now);
        assert!(!status.near_green);
    }

    #[test]
    fn near_green_is_computed_during_override() {
        let course = course();
        let mut detector = HoleDetector::new(&course);
        let now = Utc::now();
        detector.set_manual_hole(2, now);
        let green2 = course.hole(2).unwrap().green.unwrap();

        assert!(detector.on_fix(&fix_at(green2), &course, now).near_green);
    }

    #[test]
    fn missing_green_is_never_near() {
        let mut course = course();
        course.holes[0].green = None;
        let mut detector = HoleDetector::new(&course);
        let tee = course.hole(1).unwrap().tee.unwrap();

        assert!(!detector.on_fix(&fix_at(tee), &course, Utc::now()).near_green);
    }
}
