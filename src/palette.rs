// SPDX-License-Identifier: GPL-3.0-only

//! False-color palettes for 8-bit greyscale streams
//!
//! Each palette maps a sample value to an RGB triple. The tables are
//! immutable and shared by every frame.

use serde::{Deserialize, Serialize};

/// 256-entry RGB lookup table
pub type Palette = [[u8; 3]; 256];

/// Built-in colormaps, in cycling order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Grayscale,
    Inferno,
    Ironblack,
}

impl Colormap {
    pub const ALL: [Colormap; 3] = [Colormap::Grayscale, Colormap::Inferno, Colormap::Ironblack];

    pub fn name(self) -> &'static str {
        match self {
            Colormap::Grayscale => "grayscale",
            Colormap::Inferno => "inferno",
            Colormap::Ironblack => "ironblack",
        }
    }

    /// Look up a colormap by its name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Comma-separated list of all names, for messages
    pub fn names() -> String {
        Self::ALL.map(Colormap::name).join(", ")
    }

    fn position(self) -> usize {
        match self {
            Colormap::Grayscale => 0,
            Colormap::Inferno => 1,
            Colormap::Ironblack => 2,
        }
    }

    /// Step through [`Colormap::ALL`] by `step`, wrapping around
    pub fn cycle(self, step: i32) -> Self {
        let len = Self::ALL.len() as i32;
        let next = (self.position() as i32 + step).rem_euclid(len);
        Self::ALL[next as usize]
    }

    pub fn palette(self) -> &'static Palette {
        match self {
            Colormap::Grayscale => &GRAYSCALE,
            Colormap::Inferno => &INFERNO,
            Colormap::Ironblack => &IRONBLACK,
        }
    }
}

impl std::fmt::Display for Colormap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const fn grayscale_ramp() -> Palette {
    let mut table = [[0u8; 3]; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = [i as u8, i as u8, i as u8];
        i += 1;
    }
    table
}

static GRAYSCALE: Palette = grayscale_ramp();

// matplotlib "inferno"
#[rustfmt::skip]
static INFERNO: Palette = [
    [0, 0, 4], [1, 0, 5], [1, 1, 6], [1, 1, 8], [2, 1, 10], [2, 2, 12],
    [2, 2, 14], [3, 2, 16], [4, 3, 18], [4, 3, 20], [5, 4, 23], [6, 4, 25],
    [7, 5, 27], [8, 5, 29], [9, 6, 31], [10, 7, 34], [11, 7, 36], [12, 8, 38],
    [13, 8, 41], [14, 9, 43], [16, 9, 45], [17, 10, 48], [18, 10, 50], [20, 11, 52],
    [21, 11, 55], [22, 11, 57], [24, 12, 60], [25, 12, 62], [27, 12, 65], [28, 12, 67],
    [30, 12, 69], [31, 12, 72], [33, 12, 74], [35, 12, 76], [36, 12, 79], [38, 12, 81],
    [40, 11, 83], [41, 11, 85], [43, 11, 87], [45, 11, 89], [47, 10, 91], [49, 10, 92],
    [50, 10, 94], [52, 10, 95], [54, 9, 97], [56, 9, 98], [57, 9, 99], [59, 9, 100],
    [61, 9, 101], [62, 9, 102], [64, 10, 103], [66, 10, 104], [68, 10, 104], [69, 10, 105],
    [71, 11, 106], [73, 11, 106], [74, 12, 107], [76, 12, 107], [77, 13, 108], [79, 13, 108],
    [81, 14, 108], [82, 14, 109], [84, 15, 109], [85, 15, 109], [87, 16, 110], [89, 16, 110],
    [90, 17, 110], [92, 18, 110], [93, 18, 110], [95, 19, 110], [97, 19, 110], [98, 20, 110],
    [100, 21, 110], [101, 21, 110], [103, 22, 110], [105, 22, 110], [106, 23, 110], [108, 24, 110],
    [109, 24, 110], [111, 25, 110], [113, 25, 110], [114, 26, 110], [116, 26, 110], [117, 27, 110],
    [119, 28, 109], [120, 28, 109], [122, 29, 109], [124, 29, 109], [125, 30, 109], [127, 30, 108],
    [128, 31, 108], [130, 32, 108], [132, 32, 107], [133, 33, 107], [135, 33, 107], [136, 34, 106],
    [138, 34, 106], [140, 35, 105], [141, 35, 105], [143, 36, 105], [144, 37, 104], [146, 37, 104],
    [147, 38, 103], [149, 38, 103], [151, 39, 102], [152, 39, 102], [154, 40, 101], [155, 41, 100],
    [157, 41, 100], [159, 42, 99], [160, 42, 99], [162, 43, 98], [163, 44, 97], [165, 44, 96],
    [166, 45, 96], [168, 46, 95], [169, 46, 94], [171, 47, 94], [173, 48, 93], [174, 48, 92],
    [176, 49, 91], [177, 50, 90], [179, 50, 90], [180, 51, 89], [182, 52, 88], [183, 53, 87],
    [185, 53, 86], [186, 54, 85], [188, 55, 84], [189, 56, 83], [191, 57, 82], [192, 58, 81],
    [193, 58, 80], [195, 59, 79], [196, 60, 78], [198, 61, 77], [199, 62, 76], [200, 63, 75],
    [202, 64, 74], [203, 65, 73], [204, 66, 72], [206, 67, 71], [207, 68, 70], [208, 69, 69],
    [210, 70, 68], [211, 71, 67], [212, 72, 66], [213, 74, 65], [215, 75, 63], [216, 76, 62],
    [217, 77, 61], [218, 78, 60], [219, 80, 59], [221, 81, 58], [222, 82, 56], [223, 83, 55],
    [224, 85, 54], [225, 86, 53], [226, 87, 52], [227, 89, 51], [228, 90, 49], [229, 92, 48],
    [230, 93, 47], [231, 94, 46], [232, 96, 45], [233, 97, 43], [234, 99, 42], [235, 100, 41],
    [235, 102, 40], [236, 103, 38], [237, 105, 37], [238, 106, 36], [239, 108, 35], [239, 110, 33],
    [240, 111, 32], [241, 113, 31], [241, 115, 29], [242, 116, 28], [243, 118, 27], [243, 120, 25],
    [244, 121, 24], [245, 123, 23], [245, 125, 21], [246, 126, 20], [246, 128, 19], [247, 130, 18],
    [247, 132, 16], [248, 133, 15], [248, 135, 14], [248, 137, 12], [249, 139, 11], [249, 140, 10],
    [249, 142, 9], [250, 144, 8], [250, 146, 7], [250, 148, 7], [251, 150, 6], [251, 151, 6],
    [251, 153, 6], [251, 155, 6], [251, 157, 7], [252, 159, 7], [252, 161, 8], [252, 163, 9],
    [252, 165, 10], [252, 166, 12], [252, 168, 13], [252, 170, 15], [252, 172, 17], [252, 174, 18],
    [252, 176, 20], [252, 178, 22], [252, 180, 24], [251, 182, 26], [251, 184, 29], [251, 186, 31],
    [251, 188, 33], [251, 190, 35], [250, 192, 38], [250, 194, 40], [250, 196, 42], [250, 198, 45],
    [249, 199, 47], [249, 201, 50], [249, 203, 53], [248, 205, 55], [248, 207, 58], [247, 209, 61],
    [247, 211, 64], [246, 213, 67], [246, 215, 70], [245, 217, 73], [245, 219, 76], [244, 221, 79],
    [244, 223, 83], [244, 225, 86], [243, 227, 90], [243, 229, 93], [242, 230, 97], [242, 232, 101],
    [242, 234, 105], [241, 236, 109], [241, 237, 113], [241, 239, 117], [241, 241, 121], [242, 242, 125],
    [242, 244, 130], [243, 245, 134], [243, 246, 138], [244, 248, 142], [245, 249, 146], [246, 250, 150],
    [248, 251, 154], [249, 252, 157], [250, 253, 161], [252, 255, 164],
];

// Thermal "iron" ramp starting from white
#[rustfmt::skip]
static IRONBLACK: Palette = [
    [255, 255, 255], [253, 253, 253], [251, 251, 251], [249, 249, 249], [247, 247, 247], [245, 245, 245],
    [243, 243, 243], [241, 241, 241], [239, 239, 239], [237, 237, 237], [235, 235, 235], [233, 233, 233],
    [231, 231, 231], [229, 229, 229], [227, 227, 227], [225, 225, 225], [223, 223, 223], [221, 221, 221],
    [219, 219, 219], [217, 217, 217], [215, 215, 215], [213, 213, 213], [211, 211, 211], [209, 209, 209],
    [207, 207, 207], [205, 205, 205], [203, 203, 203], [201, 201, 201], [199, 199, 199], [197, 197, 197],
    [195, 195, 195], [193, 193, 193], [191, 191, 191], [189, 189, 189], [187, 187, 187], [185, 185, 185],
    [183, 183, 183], [181, 181, 181], [179, 179, 179], [177, 177, 177], [175, 175, 175], [173, 173, 173],
    [171, 171, 171], [169, 169, 169], [167, 167, 167], [165, 165, 165], [163, 163, 163], [161, 161, 161],
    [159, 159, 159], [157, 157, 157], [155, 155, 155], [153, 153, 153], [151, 151, 151], [149, 149, 149],
    [147, 147, 147], [145, 145, 145], [143, 143, 143], [141, 141, 141], [139, 139, 139], [137, 137, 137],
    [135, 135, 135], [133, 133, 133], [131, 131, 131], [129, 129, 129], [126, 126, 126], [124, 124, 124],
    [122, 122, 122], [120, 120, 120], [118, 118, 118], [116, 116, 116], [114, 114, 114], [112, 112, 112],
    [110, 110, 110], [108, 108, 108], [106, 106, 106], [104, 104, 104], [102, 102, 102], [100, 100, 100],
    [98, 98, 98], [96, 96, 96], [94, 94, 94], [92, 92, 92], [90, 90, 90], [88, 88, 88],
    [86, 86, 86], [84, 84, 84], [82, 82, 82], [80, 80, 80], [78, 78, 78], [76, 76, 76],
    [74, 74, 74], [72, 72, 72], [70, 70, 70], [68, 68, 68], [66, 66, 66], [64, 64, 64],
    [62, 62, 62], [60, 60, 60], [58, 58, 58], [56, 56, 56], [54, 54, 54], [52, 52, 52],
    [50, 50, 50], [48, 48, 48], [46, 46, 46], [44, 44, 44], [42, 42, 42], [40, 40, 40],
    [38, 38, 38], [36, 36, 36], [34, 34, 34], [32, 32, 32], [30, 30, 30], [28, 28, 28],
    [26, 26, 26], [24, 24, 24], [22, 22, 22], [20, 20, 20], [18, 18, 18], [16, 16, 16],
    [14, 14, 14], [12, 12, 12], [10, 10, 10], [8, 8, 8], [6, 6, 6], [4, 4, 4],
    [2, 2, 2], [0, 0, 0], [0, 0, 9], [2, 0, 16], [4, 0, 24], [6, 0, 31],
    [8, 0, 38], [10, 0, 45], [12, 0, 53], [14, 0, 60], [17, 0, 67], [19, 0, 74],
    [21, 0, 82], [23, 0, 89], [25, 0, 96], [27, 0, 103], [29, 0, 111], [31, 0, 118],
    [36, 0, 120], [41, 0, 121], [46, 0, 122], [51, 0, 123], [56, 0, 124], [61, 0, 125],
    [66, 0, 126], [71, 0, 127], [76, 1, 128], [81, 1, 129], [86, 1, 130], [91, 1, 131],
    [96, 1, 132], [101, 1, 133], [106, 1, 134], [111, 1, 135], [116, 1, 136], [121, 1, 136],
    [125, 2, 137], [130, 2, 137], [135, 3, 137], [139, 3, 138], [144, 3, 138], [149, 4, 138],
    [153, 4, 139], [158, 5, 139], [163, 5, 139], [167, 5, 140], [172, 6, 140], [177, 6, 140],
    [181, 7, 141], [186, 7, 141], [189, 10, 137], [191, 13, 132], [194, 16, 127], [196, 19, 121],
    [198, 22, 116], [200, 25, 111], [203, 28, 106], [205, 31, 101], [207, 34, 95], [209, 37, 90],
    [212, 40, 85], [214, 43, 80], [216, 46, 75], [218, 49, 69], [221, 52, 64], [223, 55, 59],
    [224, 57, 49], [225, 60, 47], [226, 64, 44], [227, 67, 42], [228, 71, 39], [229, 74, 37],
    [230, 78, 34], [231, 81, 32], [231, 85, 29], [232, 88, 27], [233, 92, 24], [234, 95, 22],
    [235, 99, 19], [236, 102, 17], [237, 106, 14], [238, 109, 12], [239, 112, 12], [240, 116, 12],
    [240, 119, 12], [241, 123, 12], [241, 127, 12], [242, 130, 12], [242, 134, 12], [243, 138, 12],
    [243, 141, 13], [244, 145, 13], [244, 149, 13], [245, 152, 13], [245, 156, 13], [246, 160, 13],
    [246, 163, 13], [247, 167, 13], [247, 171, 13], [248, 175, 14], [248, 178, 15], [249, 182, 16],
    [249, 185, 18], [250, 189, 19], [250, 192, 20], [251, 196, 21], [251, 199, 22], [252, 203, 23],
    [252, 206, 24], [253, 210, 25], [253, 213, 27], [254, 217, 28], [254, 220, 29], [255, 224, 30],
    [255, 227, 39], [255, 229, 53], [255, 231, 67], [255, 233, 81], [255, 234, 95], [255, 236, 109],
    [255, 238, 123], [255, 240, 137], [255, 242, 151], [255, 244, 165], [255, 246, 179], [255, 248, 193],
    [255, 249, 207], [255, 251, 221], [255, 253, 235], [255, 255, 24],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grayscale_is_identity() {
        let pal = Colormap::Grayscale.palette();
        assert_eq!(pal[0], [0, 0, 0]);
        assert_eq!(pal[128], [128, 128, 128]);
        assert_eq!(pal[255], [255, 255, 255]);
    }

    #[test]
    fn test_false_color_endpoints() {
        assert_eq!(Colormap::Inferno.palette()[0], [0, 0, 4]);
        let iron = Colormap::Ironblack.palette();
        assert_eq!(iron[0], [255, 255, 255]);
        assert_ne!(iron[128], [128, 128, 128]);
    }

    #[test]
    fn test_cycle_wraps_both_ways() {
        assert_eq!(Colormap::Ironblack.cycle(1), Colormap::Grayscale);
        assert_eq!(Colormap::Grayscale.cycle(-1), Colormap::Ironblack);
        assert_eq!(Colormap::Inferno.cycle(3), Colormap::Inferno);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Colormap::from_name("inferno"), Some(Colormap::Inferno));
        assert_eq!(Colormap::from_name("IronBlack"), Some(Colormap::Ironblack));
        assert_eq!(Colormap::from_name("viridis"), None);
        assert_eq!(Colormap::names(), "grayscale, inferno, ironblack");
    }
}
