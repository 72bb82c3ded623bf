//! Movie lookup client (TMDb API).
//!
//! Serves the keyword backend's dynamic markers (category listings) and its
//! no-match fallback (regional release check + title search).

use serde::Deserialize;

const API_BASE: &str = "https://api.themoviedb.org/3";

/// Listings are capped to keep replies short.
const MAX_RESULTS: usize = 5;

/// Region checked by the release lookup.
const RELEASE_REGION: &str = "CN";

/// The category listings reachable through dynamic keyword markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovieCategory {
    NowPlaying,
    Popular,
    TopRated,
    Upcoming,
}

impl MovieCategory {
    /// Map a dynamic reply marker to a category.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "__NOW_PLAYING__" => Some(Self::NowPlaying),
            "__POPULAR__" => Some(Self::Popular),
            "__TOP_RATED__" => Some(Self::TopRated),
            "__UPCOMING__" => Some(Self::Upcoming),
            _ => None,
        }
    }

    fn endpoint(&self) -> &'static str {
        match self {
            Self::NowPlaying => "now_playing",
            Self::Popular => "popular",
            Self::TopRated => "top_rated",
            Self::Upcoming => "upcoming",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::NowPlaying => "Now playing",
            Self::Popular => "Popular movies",
            Self::TopRated => "Top rated movies",
            Self::Upcoming => "Upcoming movies",
        }
    }
}

#[derive(Deserialize)]
struct ListResponse {
    results: Vec<MovieEntry>,
}

#[derive(Deserialize)]
struct MovieEntry {
    #[serde(default)]
    id: i64,
    title: String,
    #[serde(default)]
    release_date: String,
}

#[derive(Deserialize)]
struct ReleaseDatesResponse {
    results: Vec<CountryRelease>,
}

#[derive(Deserialize)]
struct CountryRelease {
    iso_3166_1: String,
}

pub struct MovieClient {
    api_key: String,
    http: reqwest::Client,
}

impl MovieClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("movie API request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("movie API returned {status}"));
        }
        response
            .json()
            .await
            .map_err(|e| format!("bad movie API response: {e}"))
    }

    /// Formatted listing for a category, capped to the top results.
    pub async fn by_category(&self, category: MovieCategory) -> Result<String, String> {
        let url = format!(
            "{API_BASE}/movie/{}?api_key={}&language=en-US",
            category.endpoint(),
            self.api_key
        );
        let parsed: ListResponse = self.get_json(&url).await?;
        if parsed.results.is_empty() {
            return Ok(format!("No results for {}.", category.title().to_lowercase()));
        }
        Ok(format_listing(category.title(), &parsed.results))
    }

    /// Formatted listing of title search results.
    pub async fn search(&self, title: &str) -> Result<String, String> {
        if title.is_empty() {
            return Ok("Send a movie title to search for.".to_string());
        }
        let parsed = self.search_raw(title).await?;
        if parsed.results.is_empty() {
            return Ok("No results found.".to_string());
        }
        Ok(format_listing("Search results", &parsed.results))
    }

    /// Whether the first title match has a release recorded for the
    /// configured region. An unknown title reads as not released.
    pub async fn has_regional_release(&self, title: &str) -> Result<bool, String> {
        let parsed = self.search_raw(title).await?;
        let Some(movie) = parsed.results.first() else {
            return Ok(false);
        };
        let url = format!(
            "{API_BASE}/movie/{}/release_dates?api_key={}",
            movie.id, self.api_key
        );
        let releases: ReleaseDatesResponse = self.get_json(&url).await?;
        Ok(releases
            .results
            .iter()
            .any(|r| r.iso_3166_1.eq_ignore_ascii_case(RELEASE_REGION)))
    }

    async fn search_raw(&self, title: &str) -> Result<ListResponse, String> {
        let url = format!(
            "{API_BASE}/search/movie?api_key={}&query={}",
            self.api_key,
            urlencoding::encode(title)
        );
        self.get_json(&url).await
    }
}

fn format_listing(title: &str, entries: &[MovieEntry]) -> String {
    let mut out = format!("{title}:\n");
    for (i, movie) in entries.iter().take(MAX_RESULTS).enumerate() {
        if movie.release_date.is_empty() {
            out.push_str(&format!("{}. {}\n", i + 1, movie.title));
        } else {
            out.push_str(&format!("{}. {} ({})\n", i + 1, movie.title, movie.release_date));
        }
    }
    out
}
