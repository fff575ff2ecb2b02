use serde::Serialize;

/// One resolution/refresh combination an output supports.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
    /// In Hz.
    pub refresh_rate: f64,
    pub is_preferred: bool,
    pub is_current: bool,
}

impl Mode {
    pub fn new(width: u32, height: u32, refresh_rate: f64) -> Self {
        Self {
            width,
            height,
            refresh_rate,
            is_preferred: false,
            is_current: false,
        }
    }

    pub fn preferred(mut self) -> Self {
        self.is_preferred = true;
        self
    }

    pub fn current(mut self) -> Self {
        self.is_current = true;
        self
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// The zero mode is returned if an output didn't report a usable mode.
    pub fn is_unknown(&self) -> bool {
        self.area() == 0
    }

    pub fn name(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Selection algorithms over the mode list of one output.
#[derive(Debug, Clone, Copy)]
pub struct ModeResolver<'a> {
    modes: &'a [Mode],
}

impl<'a> ModeResolver<'a> {
    pub fn new(modes: &'a [Mode]) -> Self {
        Self { modes }
    }

    /// The preferred mode, otherwise the one with the biggest area (first one wins a tie).
    pub fn best_mode(&self) -> Mode {
        if let Some(preferred) = self.modes.iter().find(|mode| mode.is_preferred) {
            return *preferred;
        }

        self.modes
            .iter()
            .fold(None, |best: Option<&Mode>, mode| match best {
                Some(best) if best.area() >= mode.area() => Some(best),
                _ => Some(mode),
            })
            .copied()
            .unwrap_or_default()
    }

    /// Check the result with [`Mode::is_unknown`] before using it.
    pub fn current_mode(&self) -> Mode {
        self.modes
            .iter()
            .find(|mode| mode.is_current)
            .copied()
            .unwrap_or_default()
    }

    pub fn sorted_descending(&self) -> Vec<Mode> {
        let mut modes = self.modes.to_vec();
        // stable, so equal areas keep their order
        modes.sort_by(|a, b| b.area().cmp(&a.area()));
        modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes() -> Vec<Mode> {
        vec![
            Mode::new(1920, 1080, 60.0),
            Mode::new(3840, 2160, 60.0).preferred(),
            Mode::new(1280, 720, 60.0),
        ]
    }

    #[test]
    fn test_best_mode_prefers_flag() {
        let modes = modes();
        assert_eq!(ModeResolver::new(&modes).best_mode().name(), "3840x2160");
    }

    #[test]
    fn test_best_mode_falls_back_to_area() {
        let mut modes = modes();
        modes[1].is_preferred = false;
        assert_eq!(ModeResolver::new(&modes).best_mode().name(), "3840x2160");
    }

    #[test]
    fn test_best_mode_tie_takes_first() {
        let modes = [Mode::new(1920, 1080, 60.0), Mode::new(1920, 1080, 144.0)];
        assert_eq!(ModeResolver::new(&modes).best_mode().refresh_rate, 60.0);
    }

    #[test]
    fn test_best_mode_of_nothing() {
        assert!(ModeResolver::new(&[]).best_mode().is_unknown());
    }

    #[test]
    fn test_current_mode() {
        let mut modes = modes();
        assert!(ModeResolver::new(&modes).current_mode().is_unknown());

        modes[0].is_current = true;
        assert_eq!(ModeResolver::new(&modes).current_mode(), modes[0]);
    }

    #[test]
    fn test_sorted_descending_is_stable() {
        let modes = [
            Mode::new(1280, 720, 60.0),
            Mode::new(1920, 1080, 60.0),
            Mode::new(1280, 720, 50.0),
            Mode::new(1920, 1080, 30.0),
        ];

        let sorted: Vec<(String, f64)> = ModeResolver::new(&modes)
            .sorted_descending()
            .iter()
            .map(|mode| (mode.name(), mode.refresh_rate))
            .collect();

        assert_eq!(
            sorted,
            vec![
                ("1920x1080".to_string(), 60.0),
                ("1920x1080".to_string(), 30.0),
                ("1280x720".to_string(), 60.0),
                ("1280x720".to_string(), 50.0),
            ]
        );
    }
}
