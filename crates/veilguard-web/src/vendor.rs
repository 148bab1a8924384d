#![forbid(unsafe_code)]

//! Vendor-prefixed capability names, tried in order (standard first).

/// Document properties holding the current fullscreen element.
pub const FULLSCREEN_ELEMENT: [&str; 4] = [
    "fullscreenElement",
    "webkitFullscreenElement",
    "mozFullScreenElement",
    "msFullscreenElement",
];

/// Document methods that leave fullscreen.
pub const EXIT_FULLSCREEN: [&str; 4] = [
    "exitFullscreen",
    "webkitExitFullscreen",
    "mozCancelFullScreen",
    "msExitFullscreen",
];

/// `CSS.supports` queries for backdrop blur.
pub const BACKDROP_FILTER: [(&str, &str); 2] = [
    ("backdrop-filter", "blur(1px)"),
    ("-webkit-backdrop-filter", "blur(1px)"),
];

/// Method exposed on the debug hook object.
pub const DEBUG_HOOK_METHOD: &str = "printscreenDetected";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_names_come_first() {
        assert_eq!(FULLSCREEN_ELEMENT[0], "fullscreenElement");
        assert_eq!(EXIT_FULLSCREEN[0], "exitFullscreen");
        assert_eq!(BACKDROP_FILTER[0].0, "backdrop-filter");
    }

    #[test]
    fn one_exit_per_fullscreen_property() {
        assert_eq!(FULLSCREEN_ELEMENT.len(), EXIT_FULLSCREEN.len());
    }
}
