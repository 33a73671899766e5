//! Geohash cells and great-circle distance for location search.

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Approximate cell width in kilometers for geohash lengths 1 to 8.
const CELL_WIDTH_KM: [f64; 8] = [5000.0, 1250.0, 156.0, 39.1, 4.89, 1.22, 0.153, 0.0382];

/// Radius search over a table keyed by geohash cell and id.
///
/// The value returned next to each page is the state for the following
/// call; an empty page ends the search.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSearch {
    pub latitude: f64,
    pub longitude: f64,
    /// Kilometers, clamped to `1..=999`
    pub distance: f64,
    /// Rows per call, clamped to `1..=250`
    pub count: u32,
    /// Store the distance from the center in a `distance` column
    pub calc_distance: bool,
    /// Cell being scanned
    pub geohash: Option<String>,
    /// Cells still to scan after the current one
    pub neighbors: Vec<String>,
    /// Last id returned from the current cell
    pub id: Option<String>,
}

impl LocationSearch {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            distance: 2.0,
            count: 50,
            calc_distance: false,
            geohash: None,
            neighbors: Vec::new(),
            id: None,
        }
    }

    pub fn distance(mut self, km: f64) -> Self {
        self.distance = km;
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn calc_distance(mut self) -> Self {
        self.calc_distance = true;
        self
    }

    /// Cell precision for the search radius.
    pub fn precision(&self) -> usize {
        precision_for(self.distance.clamp(1.0, 999.0))
    }
}

/// Latitude and longitude ranges covered by a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub latitude: (f64, f64),
    pub longitude: (f64, f64),
}

impl Bounds {
    pub fn center(&self) -> (f64, f64) {
        (
            (self.latitude.0 + self.latitude.1) / 2.0,
            (self.longitude.0 + self.longitude.1) / 2.0,
        )
    }
}

pub fn encode(latitude: f64, longitude: f64, precision: usize) -> String {
    let (mut lat, mut lon) = ((-90.0, 90.0), (-180.0, 180.0));
    let mut hash = String::with_capacity(precision);
    let (mut even, mut bits, mut index) = (true, 0, 0usize);
    while hash.len() < precision {
        let (range, value) = if even {
            (&mut lon, longitude)
        } else {
            (&mut lat, latitude)
        };
        let mid = (range.0 + range.1) / 2.0;
        index <<= 1;
        if value >= mid {
            index |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even = !even;
        bits += 1;
        if bits == 5 {
            hash.push(char::from(BASE32[index]));
            bits = 0;
            index = 0;
        }
    }
    hash
}

/// `None` for characters outside the geohash alphabet.
pub fn bounds(hash: &str) -> Option<Bounds> {
    let (mut lat, mut lon) = ((-90.0, 90.0), (-180.0, 180.0));
    let mut even = true;
    for c in hash.bytes() {
        let index = BASE32.iter().position(|&b| b == c)?;
        for bit in (0..5).rev() {
            let range = if even { &mut lon } else { &mut lat };
            let mid = (range.0 + range.1) / 2.0;
            if (index >> bit) & 1 == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
        }
    }
    Some(Bounds {
        latitude: lat,
        longitude: lon,
    })
}

/// The up to eight cells around `hash`, at the same precision. Longitude
/// wraps at the antimeridian; nothing is returned beyond the poles.
pub fn neighbors(hash: &str) -> Vec<String> {
    let Some(cell) = bounds(hash) else {
        return Vec::new();
    };
    let height = cell.latitude.1 - cell.latitude.0;
    let width = cell.longitude.1 - cell.longitude.0;
    let (center_lat, center_lon) = cell.center();

    let mut cells = Vec::with_capacity(8);
    for dlat in -1i32..=1 {
        for dlon in -1i32..=1 {
            if dlat == 0 && dlon == 0 {
                continue;
            }
            let lat = center_lat + f64::from(dlat) * height;
            if !(-90.0..=90.0).contains(&lat) {
                continue;
            }
            let mut lon = center_lon + f64::from(dlon) * width;
            if lon > 180.0 {
                lon -= 360.0;
            } else if lon < -180.0 {
                lon += 360.0;
            }
            let next = encode(lat, lon, hash.len());
            if next != hash && !cells.contains(&next) {
                cells.push(next);
            }
        }
    }
    cells
}

/// Longest geohash whose cells are still at least `distance_km` wide, so a
/// cell and its neighbors cover the radius.
pub fn precision_for(distance_km: f64) -> usize {
    CELL_WIDTH_KM
        .iter()
        .rposition(|&width| width >= distance_km)
        .map_or(1, |i| i + 1)
}

/// Haversine distance in kilometers.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}
