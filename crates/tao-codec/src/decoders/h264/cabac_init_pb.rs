//! P slice 的 CABAC 上下文初始化表 (m, n), 按 cabac_init_idc 0..2 排列.

use super::cabac::CABAC_CTX_COUNT;

#[rustfmt::skip]
pub(super) const CABAC_INIT_PB: [[(i8, i8); CABAC_CTX_COUNT]; 3] = [
    // cabac_init_idc = 0
    [
        // 0 - 10
        (20, -15), (2, 54), (3, 74), (20, -15), (2, 54), (3, 74), (-28, 127), (-23, 104),
        (-6, 53), (-1, 54), (7, 51),
        // 11 - 23
        (23, 33), (23, 2), (21, 0), (1, 9), (0, 49), (-37, 118), (5, 57), (-13, 78),
        (-11, 65), (1, 62), (12, 49), (-4, 73), (17, 50),
        // 24 - 39
        (18, 64), (9, 43), (29, 0), (26, 67), (16, 90), (9, 104), (-46, 127), (-20, 104),
        (1, 67), (-13, 78), (-11, 65), (1, 62), (-6, 86), (-17, 95), (-6, 61), (9, 45),
        // 40 - 53
        (-3, 69), (-6, 81), (-11, 96), (6, 55), (7, 67), (-5, 86), (2, 88), (0, 58),
        (-3, 76), (-10, 94), (5, 54), (4, 69), (-3, 81), (0, 88),
        // 54 - 59
        (-7, 67), (-5, 74), (-4, 74), (-5, 80), (-7, 72), (1, 58),
        // 60 - 69
        (0, 41), (0, 63), (0, 63), (0, 63), (-9, 83), (4, 86), (0, 97), (-7, 72),
        (13, 41), (3, 62),
        // 70 - 104
        (0, 45), (-4, 78), (-3, 96), (-27, 126), (-28, 98), (-25, 101), (-23, 67), (-28, 82),
        (-20, 94), (-16, 83), (-22, 110), (-21, 91), (-18, 102), (-13, 93), (-29, 127), (-7, 92),
        (-5, 89), (-7, 96), (-13, 108), (-3, 46), (-1, 65), (-1, 57), (-9, 93), (-3, 74),
        (-9, 92), (-8, 87), (-23, 126), (5, 54), (6, 60), (6, 59), (6, 69), (-1, 48),
        (0, 68), (-4, 69), (-8, 88),
        // 105 - 165
        (-2, 85), (-6, 78), (-1, 75), (-7, 77), (2, 54), (5, 50), (-3, 68), (1, 50),
        (6, 42), (-4, 81), (1, 63), (-4, 70), (0, 67), (2, 57), (-2, 76), (11, 35),
        (4, 64), (1, 61), (11, 35), (18, 25), (12, 24), (13, 29), (13, 36), (-10, 93),
        (-7, 73), (-2, 73), (13, 46), (9, 49), (-7, 100), (9, 53), (2, 53), (5, 53),
        (-2, 61), (0, 56), (0, 56), (-13, 63), (-5, 60), (-1, 62), (4, 57), (-6, 69),
        (4, 57), (14, 39), (4, 51), (13, 68), (3, 64), (1, 61), (9, 63), (7, 50),
        (16, 39), (5, 44), (4, 52), (11, 48), (-5, 60), (-1, 59), (0, 59), (22, 33),
        (5, 44), (14, 43), (-1, 78), (0, 60), (9, 69),
        // 166 - 226
        (11, 28), (2, 40), (3, 44), (0, 49), (0, 46), (2, 44), (2, 51), (0, 47),
        (4, 39), (2, 62), (6, 46), (0, 54), (3, 54), (2, 58), (4, 63), (6, 51),
        (6, 57), (7, 53), (6, 52), (6, 55), (11, 45), (14, 36), (8, 53), (-1, 82),
        (7, 55), (-3, 78), (15, 46), (22, 31), (-1, 84), (25, 7), (30, -7), (28, 3),
        (28, 4), (32, 0), (34, -1), (30, 6), (30, 6), (32, 9), (31, 19), (26, 27),
        (26, 30), (37, 20), (28, 34), (17, 70), (1, 67), (5, 59), (9, 67), (16, 30),
        (18, 32), (18, 35), (22, 29), (24, 31), (23, 38), (18, 43), (20, 41), (11, 63),
        (9, 59), (9, 64), (-1, 94), (-2, 89), (-9, 108),
        // 227 - 275
        (-6, 76), (-2, 44), (0, 45), (0, 52), (-3, 64), (-2, 59), (-4, 70), (-4, 75),
        (-8, 82), (-17, 102), (-9, 77), (3, 24), (0, 42), (0, 48), (0, 55), (-6, 59),
        (-7, 71), (-12, 83), (-11, 87), (-30, 119), (1, 58), (-3, 29), (-1, 36), (1, 38),
        (2, 43), (-6, 55), (0, 58), (0, 64), (-3, 74), (-10, 90), (0, 70), (-4, 29),
        (5, 31), (7, 42), (1, 59), (-2, 58), (-3, 72), (-3, 81), (-11, 97), (0, 58),
        (8, 5), (10, 14), (14, 18), (13, 27), (2, 40), (0, 58), (-3, 70), (-6, 79),
        (-8, 85),
    ],
    // cabac_init_idc = 1
    [
        // 0 - 10
        (20, -15), (2, 54), (3, 74), (20, -15), (2, 54), (3, 74), (-28, 127), (-23, 104),
        (-6, 53), (-1, 54), (7, 51),
        // 11 - 23
        (22, 25), (34, 0), (16, 0), (-2, 9), (4, 41), (-29, 118), (2, 65), (-6, 71),
        (-13, 79), (5, 52), (9, 50), (-3, 70), (10, 54),
        // 24 - 39
        (26, 34), (19, 22), (40, 0), (57, 2), (41, 36), (26, 69), (-45, 127), (-15, 101),
        (-4, 76), (-6, 71), (-13, 79), (5, 52), (6, 69), (-13, 90), (0, 52), (8, 43),
        // 40 - 53
        (-2, 69), (-5, 82), (-10, 96), (2, 59), (2, 75), (-3, 87), (-3, 100), (1, 56),
        (-3, 74), (-6, 85), (0, 59), (-3, 81), (-7, 86), (-5, 95),
        // 54 - 59
        (-1, 66), (-1, 77), (1, 70), (-2, 86), (-5, 72), (0, 61),
        // 60 - 69
        (0, 41), (0, 63), (0, 63), (0, 63), (-9, 83), (4, 86), (0, 97), (-7, 72),
        (13, 41), (3, 62),
        // 70 - 104
        (13, 15), (7, 51), (2, 80), (-39, 127), (-18, 91), (-17, 96), (-26, 81), (-35, 98),
        (-24, 102), (-23, 97), (-27, 119), (-24, 99), (-21, 110), (-18, 102), (-36, 127), (0, 80),
        (-5, 89), (-7, 94), (-4, 92), (0, 39), (0, 65), (-15, 84), (-35, 127), (-2, 73),
        (-12, 104), (-9, 91), (-31, 127), (3, 55), (7, 56), (7, 55), (8, 61), (-3, 53),
        (0, 68), (-7, 74), (-9, 88),
        // 105 - 165
        (-13, 103), (-13, 91), (-9, 89), (-14, 92), (-8, 76), (-12, 87), (-23, 110), (-24, 105),
        (-10, 78), (-20, 112), (-17, 99), (-78, 127), (-70, 127), (-50, 127), (-46, 127), (-4, 66),
        (-5, 78), (-4, 71), (-8, 72), (2, 59), (-1, 55), (-7, 70), (-6, 75), (-8, 89),
        (-34, 119), (-3, 75), (32, 20), (30, 22), (-44, 127), (0, 54), (-5, 61), (0, 58),
        (-1, 60), (-3, 61), (-8, 67), (-25, 84), (-14, 74), (-5, 65), (5, 52), (2, 57),
        (0, 61), (-9, 69), (-11, 70), (18, 55), (-4, 71), (0, 58), (7, 61), (9, 41),
        (18, 25), (9, 32), (5, 43), (9, 47), (0, 44), (0, 51), (2, 46), (19, 38),
        (-4, 66), (15, 38), (12, 42), (9, 34), (0, 89),
        // 166 - 226
        (4, 45), (10, 28), (10, 31), (33, -11), (52, -43), (18, 15), (28, 0), (35, -22),
        (38, -25), (34, 0), (39, -18), (32, -12), (102, -94), (0, 0), (56, -15), (33, -4),
        (29, 10), (37, -5), (51, -29), (39, -9), (52, -34), (69, -58), (67, -63), (44, -5),
        (32, 7), (55, -29), (32, 1), (0, 0), (27, 36), (33, -25), (34, -30), (36, -28),
        (38, -28), (38, -27), (34, -18), (35, -16), (34, -14), (32, -8), (37, -6), (35, 0),
        (30, 10), (28, 18), (26, 25), (29, 41), (0, 75), (2, 72), (8, 77), (14, 35),
        (18, 31), (17, 35), (21, 30), (17, 45), (20, 42), (18, 45), (27, 26), (16, 54),
        (7, 66), (16, 56), (11, 73), (10, 67), (-10, 116),
        // 227 - 275
        (-23, 112), (-15, 71), (-7, 61), (0, 53), (-5, 66), (-11, 77), (-9, 80), (-9, 84),
        (-10, 87), (-34, 127), (-21, 101), (-3, 39), (-5, 53), (-7, 61), (-11, 75), (-15, 77),
        (-17, 91), (-25, 107), (-25, 111), (-28, 122), (-11, 76), (-10, 44), (-10, 52), (-10, 57),
        (-9, 58), (-16, 72), (-7, 69), (-4, 69), (-5, 74), (-9, 86), (2, 66), (-9, 34),
        (1, 32), (11, 31), (5, 52), (-2, 55), (-2, 67), (0, 73), (-8, 89), (3, 52),
        (7, 4), (10, 8), (17, 8), (16, 19), (3, 37), (-1, 61), (-5, 73), (-1, 70),
        (-4, 78),
    ],
    // cabac_init_idc = 2
    [
        // 0 - 10
        (20, -15), (2, 54), (3, 74), (20, -15), (2, 54), (3, 74), (-28, 127), (-23, 104),
        (-6, 53), (-1, 54), (7, 51),
        // 11 - 23
        (29, 16), (25, 0), (14, 0), (-10, 51), (-3, 62), (-27, 99), (26, 16), (-4, 85),
        (-24, 102), (5, 57), (6, 57), (-17, 73), (14, 57),
        // 24 - 39
        (20, 40), (20, 10), (29, 0), (54, 0), (37, 42), (12, 97), (-32, 127), (-22, 117),
        (-2, 74), (-4, 85), (-24, 102), (5, 57), (-6, 93), (-14, 88), (-6, 44), (4, 55),
        // 40 - 53
        (-11, 89), (-15, 103), (-21, 116), (19, 57), (20, 58), (4, 84), (6, 96), (1, 63),
        (-5, 85), (-13, 106), (5, 63), (6, 75), (-3, 90), (-1, 101),
        // 54 - 59
        (3, 55), (-4, 79), (-2, 75), (-12, 97), (-7, 50), (1, 60),
        // 60 - 69
        (0, 41), (0, 63), (0, 63), (0, 63), (-9, 83), (4, 86), (0, 97), (-7, 72),
        (13, 41), (3, 62),
        // 70 - 104
        (7, 34), (-9, 88), (-20, 127), (-36, 127), (-17, 91), (-14, 95), (-25, 84), (-25, 86),
        (-12, 89), (-17, 91), (-31, 127), (-14, 76), (-18, 103), (-13, 90), (-37, 127), (11, 80),
        (5, 76), (2, 84), (5, 78), (-6, 55), (4, 61), (-14, 83), (-37, 127), (-5, 79),
        (-11, 104), (-11, 91), (-30, 127), (0, 65), (-2, 79), (0, 72), (-4, 92), (-6, 56),
        (3, 68), (-8, 71), (-13, 98),
        // 105 - 165
        (-4, 86), (-12, 88), (-5, 82), (-3, 72), (-4, 67), (-8, 72), (-16, 89), (-9, 69),
        (-1, 59), (5, 66), (4, 57), (-4, 71), (-2, 71), (2, 58), (-1, 74), (-4, 44),
        (-1, 69), (0, 62), (-7, 51), (-4, 47), (-6, 42), (-3, 41), (-6, 53), (8, 76),
        (-9, 78), (-11, 83), (9, 52), (0, 67), (-5, 90), (1, 67), (-15, 72), (-5, 75),
        (-8, 80), (-21, 83), (-21, 64), (-13, 31), (-25, 64), (-29, 94), (9, 75), (17, 63),
        (-8, 74), (-5, 35), (-2, 27), (13, 91), (3, 65), (-7, 69), (8, 77), (-10, 66),
        (3, 62), (-3, 68), (-20, 81), (0, 30), (1, 7), (-3, 23), (-21, 74), (16, 66),
        (-23, 124), (17, 37), (44, -18), (50, -34), (-22, 127),
        // 166 - 226
        (4, 39), (0, 42), (7, 34), (11, 29), (8, 31), (6, 37), (7, 42), (3, 40),
        (8, 33), (13, 43), (13, 36), (4, 47), (3, 55), (2, 58), (6, 60), (8, 44),
        (11, 44), (14, 42), (7, 48), (4, 56), (4, 52), (13, 37), (9, 49), (19, 58),
        (10, 48), (12, 45), (0, 69), (20, 33), (8, 63), (35, -18), (33, -25), (28, -3),
        (24, 10), (27, 0), (34, -14), (52, -44), (39, -24), (19, 17), (31, 25), (36, 29),
        (24, 33), (34, 15), (30, 20), (22, 73), (20, 34), (19, 31), (27, 44), (19, 16),
        (15, 36), (15, 36), (21, 28), (25, 21), (30, 20), (31, 12), (27, 16), (24, 42),
        (0, 93), (14, 56), (15, 57), (26, 38), (-24, 127),
        // 227 - 275
        (-24, 115), (-22, 82), (-9, 62), (0, 53), (0, 59), (-14, 85), (-13, 89), (-13, 94),
        (-11, 92), (-29, 127), (-21, 100), (-14, 57), (-12, 67), (-11, 71), (-10, 77), (-21, 85),
        (-16, 88), (-23, 104), (-15, 98), (-37, 127), (-10, 82), (-8, 48), (-8, 61), (-8, 66),
        (-7, 70), (-14, 75), (-10, 79), (-9, 83), (-12, 92), (-18, 108), (-4, 79), (-22, 69),
        (-16, 75), (-2, 58), (1, 58), (-13, 78), (-9, 83), (-4, 81), (-13, 99), (-13, 81),
        (-6, 38), (-13, 62), (-6, 58), (-2, 59), (-16, 73), (-10, 76), (-13, 86), (-9, 83),
        (-10, 87),
    ],
];
