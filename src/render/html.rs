use crate::Result;
use crate::render::EventPlot;

/// Render a self-contained HTML lane plot (data embedded as JSON).
///
/// The template holds JS `${}` literals, so data goes in by `__DATA__` replacement.
pub fn render_event_plot(plot: &EventPlot) -> Result<String> {
    let json = serde_json::to_string(plot)?; // embedded as JS object literal

    const TEMPLATE: &str = r##"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>sched-assert</title>
<style>
  body { font-family: system-ui, -apple-system, Segoe UI, Roboto, Arial, sans-serif; margin: 0; }
  header { padding: 12px 16px; border-bottom: 1px solid #ddd; }
  .main { padding: 12px 16px; }

  .summary { display: flex; gap: 16px; flex-wrap: wrap; font-size: 14px; color: #333; }
  .pill { padding: 4px 8px; border: 1px solid #ddd; border-radius: 999px; background: #fafafa; }
  .legend { display: flex; gap: 12px; margin: 8px 0; font-size: 13px; }
  .swatch { display: inline-block; width: 12px; height: 12px; margin-right: 4px; vertical-align: middle; }
  .muted { color: #777; font-size: 12px; }

  svg text { font-size: 12px; fill: #333; }
  .lane-bg { fill: #f7f7f7; }
  .span:hover { opacity: 0.7; }
</style>
</head>
<body>
<header>
  <div class="summary" id="summary"></div>
</header>

<div class="main">
  <div class="legend" id="legend"></div>
  <svg id="plot"></svg>
  <div id="hover" class="muted">&nbsp;</div>
</div>

<script>
// Embedded plot data (JSON object literal)
const DATA = __DATA__;

const COLORS = ["#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1"];
const LANE_H = 24, LABEL_W = 80, AXIS_H = 24, WIDTH = 1100;

function fmtS(x) {
  return (Math.round(x * 1e6) / 1e6).toFixed(6);
}

function escapeHtml(s) {
  return String(s)
    .replaceAll("&", "&amp;")
    .replaceAll("<", "&lt;")
    .replaceAll(">", "&gt;")
    .replaceAll('"', "&quot;")
    .replaceAll("'", "&#39;");
}

function renderSummary() {
  const [x0, x1] = DATA.xlim;
  let spans = 0;
  for (const n of DATA.names) spans += (DATA.events[n] || []).length;
  document.getElementById("summary").innerHTML = `
    <span class="pill">tasks: <b>${DATA.names.length}</b></span>
    <span class="pill">lanes: <b>${DATA.num_lanes}</b></span>
    <span class="pill">spans: <b>${spans}</b></span>
    <span class="pill">range: <b>${fmtS(x0)} .. ${fmtS(x1)} s</b></span>
  `;
  document.getElementById("legend").innerHTML = DATA.names
    .map((n, i) => `<span><span class="swatch" style="background:${COLORS[i % COLORS.length]}"></span>${escapeHtml(n)}</span>`)
    .join("");
}

function renderPlot() {
  const svg = document.getElementById("plot");
  const [x0, x1] = DATA.xlim;
  const plotW = WIDTH - LABEL_W;
  const scale = x1 > x0 ? plotW / (x1 - x0) : 0;
  const height = DATA.num_lanes * LANE_H + AXIS_H;
  svg.setAttribute("width", WIDTH);
  svg.setAttribute("height", height);

  let out = "";
  for (let lane = 0; lane < DATA.num_lanes; lane++) {
    const y = lane * LANE_H;
    out += `<rect class="lane-bg" x="${LABEL_W}" y="${y + 2}" width="${plotW}" height="${LANE_H - 4}"></rect>`;
    out += `<text x="4" y="${y + LANE_H / 2 + 4}">${escapeHtml(DATA.lane_prefix)}${lane}</text>`;
  }

  DATA.names.forEach((name, i) => {
    const color = COLORS[i % COLORS.length];
    for (const ev of DATA.events[name] || []) {
      const s = Math.max(ev.start, x0), e = Math.min(ev.end, x1);
      if (e < s || ev.lane >= DATA.num_lanes) continue;
      const x = LABEL_W + (s - x0) * scale;
      const w = Math.max(1, (e - s) * scale);
      const y = ev.lane * LANE_H + 4;
      out += `<rect class="span" fill="${color}" x="${x}" y="${y}" width="${w}" height="${LANE_H - 8}"
        data-info="${escapeHtml(name)} ${escapeHtml(DATA.lane_prefix)}${ev.lane}: ${fmtS(ev.start)} .. ${fmtS(ev.end)} s"></rect>`;
    }
  });

  const axisY = DATA.num_lanes * LANE_H + 16;
  for (let k = 0; k <= 10; k++) {
    const t = x0 + (x1 - x0) * k / 10;
    out += `<text x="${LABEL_W + plotW * k / 10 - 12}" y="${axisY}">${(Math.round(t * 1000) / 1000)}</text>`;
  }

  svg.innerHTML = out;
  for (const r of svg.querySelectorAll(".span")) {
    r.onmouseenter = () => { document.getElementById("hover").textContent = r.dataset.info; };
  }
}

renderSummary();
renderPlot();
</script>
</body>
</html>
"##;

    Ok(TEMPLATE.replace("__DATA__", &json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::PlotEvent;
    use std::collections::BTreeMap;

    #[test]
    fn embeds_plot_data() {
        let plot = EventPlot {
            events: BTreeMap::from([(
                "foo-42".to_string(),
                vec![PlotEvent {
                    start: 0.0,
                    end: 5.0,
                    lane: 0,
                }],
            )]),
            names: vec!["foo-42".to_string()],
            lane_prefix: "CPU: ".to_string(),
            num_lanes: 4,
            xlim: (0.0, 20.0),
        };

        let html = render_event_plot(&plot).unwrap();
        assert!(!html.contains("__DATA__"));
        assert!(html.contains(r#""names":["foo-42"]"#));
        assert!(html.contains(r#""xlim":[0.0,20.0]"#));
        assert!(html.contains(r##""#4e79a7""##));
        assert!(html.trim_end().ends_with("</html>"));
    }
}
