/**
 * PERFDATA - Extraction des métriques depuis les perfdata de supervision
 *
 * RÔLE :
 * Découpe une chaîne de perfdata au format plugin de supervision
 * (`label=value[UOM];warn;crit;min;max`) et la convertit en couples
 * (nom de métrique, valeur) prêts pour Graphite.
 *
 * FONCTIONNEMENT :
 * - Tokens `label=valeur`, le label peut contenir des espaces ou des quotes
 * - Valeur, warning et critical doivent être numériques
 * - Labels assainis : `[^A-Za-z0-9_-]` → `_`, suffixe `_<n>` → `.<n>`
 * - warn + crit présents → deux pseudo-métriques `<nom>_warn` / `<nom>_crit`
 *
 * EXEMPLE :
 * `/=30MB;4899;4568;1234;0 /var=50MB;4899;4568;1234;0 /toto=`
 * donne `_=30`, `_warn=4899`, `_crit=4568`, `_var=50`, ...
 */

/// Une métrique telle que décrite dans la perfdata
#[derive(Debug, Clone, PartialEq)]
pub struct PerfMetric {
    /// Label brut (quotes retirées)
    pub label: String,
    /// Valeur normalisée (`120`, `1.5`...)
    pub value: String,
    /// Unité (`ms`, `%`, `MB`...), éventuellement vide
    pub uom: String,
    pub warning: Option<String>,
    pub critical: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
}

/// Couple (nom Graphite, valeur) issu de l'extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub name: String,
    pub value: String,
}

impl MetricSample {
    fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

const VALUE_CHARS: &str = "0123456789.-+eE";
const THRESHOLD_CHARS: &str = "0123456789.-+eE:~@";

/// Remplace tout caractère hors `[A-Za-z0-9_-]` par `replacement`
pub fn sanitize(raw: &str, replacement: char) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { replacement })
        .collect()
}

/// Assainit un label et replie le suffixe numérique : `disk_0` → `disk.0`
pub fn sanitize_label(raw: &str) -> String {
    let mut name = sanitize(raw, '_');
    let digits = name.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits > 0 && digits < name.len() {
        let underscore = name.len() - digits - 1;
        if name.as_bytes()[underscore] == b'_' {
            name.replace_range(underscore..=underscore, ".");
        }
    }
    name
}

/// Découpe la perfdata en tokens `label=valeur`
///
/// Un `=` suivi d'un blanc ne produit pas de token, le label suivant
/// démarre juste après lui.
fn split_tokens(perf_data: &str) -> Vec<(&str, &str)> {
    let mut tokens = Vec::new();
    let mut start = 0;

    while let Some(offset) = perf_data[start..].find('=') {
        let eq = start + offset;
        let label = &perf_data[start..eq];
        let rest = &perf_data[eq + 1..];
        let value_len = rest.find(char::is_whitespace).unwrap_or(rest.len());

        if !label.is_empty() && value_len > 0 {
            tokens.push((label, &rest[..value_len]));
            start = eq + 1 + value_len;
        } else {
            start = eq + 1;
        }
    }

    tokens
}

/// Convertit un nombre au format le plus court (`120.0` → `120`)
fn normalize_number(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Some(int.to_string());
    }
    let float = raw.parse::<f64>().ok().filter(|f| f.is_finite())?;
    if float.fract() == 0.0 && float.abs() < 1e15 {
        Some((float as i64).to_string())
    } else {
        Some(float.to_string())
    }
}

fn take_prefix<'a>(s: &'a str, allowed: impl Fn(char) -> bool) -> (&'a str, &'a str) {
    let end = s.find(|c: char| !allowed(c)).unwrap_or(s.len());
    s.split_at(end)
}

fn threshold(field: Option<&str>, allowed: &str) -> Option<String> {
    field
        .filter(|f| !f.is_empty() && f.chars().all(|c| allowed.contains(c)))
        .and_then(normalize_number)
}

/// Analyse un token `label=valeur[UOM][;warn;crit;min;max]`
fn parse_metric(label: &str, raw_value: &str) -> Option<PerfMetric> {
    let label = label.trim().replace('\'', "");
    if label.is_empty() {
        return None;
    }

    let (value, rest) = take_prefix(raw_value, |c| VALUE_CHARS.contains(c));
    let value = normalize_number(value)?;
    let (uom, rest) = take_prefix(rest, |c| c.is_alphanumeric() || c == '_' || c == '/' || c == '%');

    let mut fields = match rest.strip_prefix(';') {
        Some(fields) => fields.split(';'),
        None => "".split(';'),
    };
    let warning = threshold(fields.next(), THRESHOLD_CHARS);
    let critical = threshold(fields.next(), THRESHOLD_CHARS);
    let mut min = threshold(fields.next(), VALUE_CHARS);
    let mut max = threshold(fields.next(), VALUE_CHARS);

    if uom == "%" {
        min.get_or_insert_with(|| "0".to_string());
        max.get_or_insert_with(|| "100".to_string());
    }

    Some(PerfMetric {
        label,
        value,
        uom: uom.to_string(),
        warning,
        critical,
        min,
        max,
    })
}

/// Parse toute la perfdata ; un label répété remplace le précédent
pub fn parse(perf_data: &str) -> Vec<PerfMetric> {
    let mut metrics: Vec<PerfMetric> = Vec::new();

    for (label, value) in split_tokens(perf_data) {
        let Some(metric) = parse_metric(label, value) else {
            continue;
        };
        match metrics.iter_mut().find(|m| m.label == metric.label) {
            Some(existing) => *existing = metric,
            None => metrics.push(metric),
        }
    }

    metrics
}

/// Extrait les couples (nom, valeur) à envoyer pour un résultat de check
///
/// Ne renvoie jamais d'erreur : une perfdata illisible donne une liste vide.
pub fn extract(perf_data: &str) -> Vec<MetricSample> {
    let mut samples = Vec::new();

    for metric in parse(perf_data) {
        let name = sanitize_label(&metric.label);
        if metric.value.is_empty() {
            continue;
        }

        if let (Some(warning), Some(critical)) = (&metric.warning, &metric.critical) {
            samples.push(MetricSample::new(name.clone(), metric.value));
            samples.push(MetricSample::new(format!("{name}_warn"), warning.clone()));
            samples.push(MetricSample::new(format!("{name}_crit"), critical.clone()));
        } else {
            samples.push(MetricSample::new(name, metric.value));
        }
    }

    samples
}
